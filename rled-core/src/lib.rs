pub mod decode;
pub mod descriptor;
pub mod dither;
pub mod encode;
pub mod format;
pub mod map;
pub mod pipeline;
pub mod surface;

#[cfg(test)]
mod tests {
    use crate::decode::{LineRecord, RleReader};
    use crate::encode::rewrite;
    use crate::format::{pack, Opcode, RleHeader};

    /// Decoded line pattern per frame, padded with implicit trailing blanks
    /// up to the header height.
    fn frame_lines(data: &[u8]) -> Vec<Vec<Vec<u8>>> {
        let mut reader = RleReader::new(data).unwrap();
        let height = reader.header.height as usize;
        let mut frames = Vec::new();
        for _ in 0..reader.header.frame_count {
            let mut lines: Vec<Vec<u8>> = Vec::new();
            loop {
                match reader.next_record().unwrap() {
                    LineRecord::Line { data, .. } => lines.push(data.to_vec()),
                    LineRecord::EndOfFrame => break,
                }
            }
            while lines.len() < height {
                lines.push(Vec::new());
            }
            frames.push(lines);
        }
        frames
    }

    #[test]
    fn rewrite_without_trim_preserves_decoded_frames() {
        // Two frames with interior blanks, explicit trailing blanks, and a
        // non-eof frame terminator.
        let mut data = RleHeader::new(4, 4, 2).to_bytes().to_vec();
        // Frame 0: data, blank, data, trailing blank.
        data.extend_from_slice(&pack(Opcode::LineStart, 4).to_be_bytes());
        data.extend_from_slice(&[1, 2, 3, 4]);
        data.extend_from_slice(&pack(Opcode::LineStart, 0).to_be_bytes());
        data.extend_from_slice(&pack(Opcode::LineStart, 4).to_be_bytes());
        data.extend_from_slice(&[5, 6, 7, 8]);
        data.extend_from_slice(&pack(Opcode::LineStart, 0).to_be_bytes());
        data.extend_from_slice(&pack(Opcode::PixelRun, 0).to_be_bytes());
        // Frame 1: blank, blank, data, data.
        data.extend_from_slice(&pack(Opcode::LineStart, 0).to_be_bytes());
        data.extend_from_slice(&pack(Opcode::LineStart, 0).to_be_bytes());
        data.extend_from_slice(&pack(Opcode::LineStart, 4).to_be_bytes());
        data.extend_from_slice(&[9, 10, 11, 12]);
        data.extend_from_slice(&pack(Opcode::LineStart, 4).to_be_bytes());
        data.extend_from_slice(&[13, 14, 15, 16]);
        data.extend_from_slice(&0u32.to_be_bytes());

        let out = rewrite(&data, false).unwrap();

        let before = RleHeader::from_bytes(&data).unwrap();
        let after = RleHeader::from_bytes(&out).unwrap();
        assert_eq!(after.width, before.width);
        assert_eq!(after.height, before.height);
        assert_eq!(after.frame_count, before.frame_count);
        assert_eq!(after.depth_meta, before.depth_meta);
        assert_eq!(frame_lines(&out), frame_lines(&data));

        // The trailing blank and the odd terminator both normalized away.
        assert_eq!(out.len(), data.len() - 4);

        // A second rewrite is a fixed point.
        assert_eq!(rewrite(&out, false).unwrap(), out);
    }

    #[test]
    fn canonical_streams_roundtrip_byte_for_byte() {
        let mut data = RleHeader::new(2, 3, 1).to_bytes().to_vec();
        data.extend_from_slice(&pack(Opcode::LineStart, 0).to_be_bytes());
        data.extend_from_slice(&pack(Opcode::LineStart, 2).to_be_bytes());
        data.extend_from_slice(&[0xAB, 0xCD]);
        data.extend_from_slice(&pack(Opcode::LineStart, 2).to_be_bytes());
        data.extend_from_slice(&[0xEF, 0x01]);
        data.extend_from_slice(&0u32.to_be_bytes());
        assert_eq!(rewrite(&data, false).unwrap(), data);
    }
}
