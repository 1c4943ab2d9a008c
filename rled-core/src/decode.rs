use anyhow::bail;

use crate::format::{self, Opcode, RleHeader, HEADER_SIZE};
use crate::surface::{Color, Surface};

/// Streaming reader over a complete `rlëD` resource.
pub struct RleReader<'a> {
    data: &'a [u8],
    pos: usize,
    pub header: RleHeader,
}

/// One record in a frame's opcode stream.
#[derive(Debug)]
pub enum LineRecord<'a> {
    /// A `line_start` opcode word and its packed pixel data. Empty data
    /// means a blank line.
    Line { word: u32, data: &'a [u8] },
    /// Any other opcode; the frame ends here.
    EndOfFrame,
}

impl<'a> RleReader<'a> {
    /// Parse the header and position the reader at the first frame.
    pub fn new(data: &'a [u8]) -> anyhow::Result<Self> {
        let header = RleHeader::from_bytes(data)?;
        Ok(RleReader {
            data,
            pos: HEADER_SIZE,
            header,
        })
    }

    fn read_word(&mut self) -> anyhow::Result<u32> {
        let Some(bytes) = self.data.get(self.pos..self.pos + 4) else {
            bail!("short read: opcode word at offset {}", self.pos);
        };
        self.pos += 4;
        Ok(u32::from_be_bytes(bytes.try_into().unwrap()))
    }

    fn read_slice(&mut self, len: usize) -> anyhow::Result<&'a [u8]> {
        let Some(bytes) = self.data.get(self.pos..self.pos + len) else {
            bail!("short read: {} byte line payload at offset {}", len, self.pos);
        };
        self.pos += len;
        Ok(bytes)
    }

    /// Read the next record of the current frame.
    pub fn next_record(&mut self) -> anyhow::Result<LineRecord<'a>> {
        let word = self.read_word()?;
        match format::unpack(word) {
            (Some(Opcode::LineStart), count) => {
                let data = self.read_slice(count as usize)?;
                Ok(LineRecord::Line { word, data })
            }
            _ => Ok(LineRecord::EndOfFrame),
        }
    }
}

/// How many blank lines can be removed from both the top and bottom of every
/// frame. Capped at half the frame height so an all-blank sprite trims to
/// zero height rather than negative.
pub fn compute_trim(data: &[u8]) -> anyhow::Result<u16> {
    let mut reader = RleReader::new(data)?;
    let height = reader.header.height as i32;
    let mut trim = height / 2;
    for _ in 0..reader.header.frame_count {
        let mut line = 0i32;
        let mut top = height;
        let mut bottom = 0i32;
        loop {
            match reader.next_record()? {
                LineRecord::Line { data, .. } => {
                    if !data.is_empty() {
                        if top > line {
                            top = line;
                        }
                        bottom = line + 1;
                    }
                    line += 1;
                }
                LineRecord::EndOfFrame => break,
            }
        }
        trim = trim.min(top).min(height - bottom);
    }
    Ok(trim.max(0) as u16)
}

/// Decode every frame into an RGBA surface. Lines omitted before the frame
/// terminator are blank; transparent runs leave pixels untouched.
pub fn frame_surfaces(data: &[u8]) -> anyhow::Result<Vec<Surface>> {
    let mut reader = RleReader::new(data)?;
    let width = reader.header.width as u32;
    let height = reader.header.height as u32;
    if width as usize * height as usize > 0x0400_0000 {
        bail!("unreasonable sprite dimensions {}x{}", width, height);
    }
    let mut frames = Vec::with_capacity(reader.header.frame_count as usize);
    for _ in 0..reader.header.frame_count {
        let mut surface = Surface::new(width, height);
        let mut y = 0u32;
        loop {
            match reader.next_record()? {
                LineRecord::Line { data, .. } => {
                    if y < height && !data.is_empty() {
                        decode_line(data, &mut surface, y)?;
                    }
                    y += 1;
                }
                LineRecord::EndOfFrame => break,
            }
        }
        frames.push(surface);
    }
    Ok(frames)
}

/// Replay one line's packed opcodes onto a surface row. Payload counts are
/// byte counts over 16-bit pixels; literal blocks are dword-padded; pixel
/// runs carry the pixel word doubled into one dword.
fn decode_line(line: &[u8], surface: &mut Surface, y: u32) -> anyhow::Result<()> {
    let width = surface.width();
    let mut pos = 0usize;
    let mut x = 0u32;
    while pos + 4 <= line.len() {
        let word = u32::from_be_bytes(line[pos..pos + 4].try_into().unwrap());
        pos += 4;
        let (op, count) = format::unpack(word);
        let count = count as usize;
        match op {
            Some(Opcode::PixelData) => {
                let Some(bytes) = line.get(pos..pos + count) else {
                    bail!("pixel data overruns its line");
                };
                for pair in bytes.chunks_exact(2) {
                    if x >= width {
                        break;
                    }
                    let pixel = u16::from_be_bytes([pair[0], pair[1]]);
                    surface.set(x, y, Color::from_rgb555_word(pixel));
                    x += 1;
                }
                pos += (count + 3) & !3;
            }
            Some(Opcode::TransparentRun) => {
                x = (x + (count / 2) as u32).min(width);
            }
            Some(Opcode::PixelRun) => {
                let Some(bytes) = line.get(pos..pos + 4) else {
                    bail!("pixel run overruns its line");
                };
                pos += 4;
                let pixel = u16::from_be_bytes([bytes[0], bytes[1]]);
                let color = Color::from_rgb555_word(pixel);
                for _ in 0..count / 2 {
                    if x >= width {
                        break;
                    }
                    surface.set(x, y, color);
                    x += 1;
                }
            }
            _ => break,
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::pack;

    fn push_word(out: &mut Vec<u8>, word: u32) {
        out.extend_from_slice(&word.to_be_bytes());
    }

    fn blank_line(out: &mut Vec<u8>) {
        push_word(out, pack(Opcode::LineStart, 0));
    }

    fn data_line(out: &mut Vec<u8>, payload: &[u8]) {
        push_word(out, pack(Opcode::LineStart, payload.len() as u32));
        out.extend_from_slice(payload);
    }

    /// One-frame sprite with the given line pattern (None = blank).
    fn sprite(width: u16, lines: &[Option<&[u8]>]) -> Vec<u8> {
        let mut out = RleHeader::new(width, lines.len() as u16, 1).to_bytes().to_vec();
        for line in lines {
            match line {
                Some(payload) => data_line(&mut out, payload),
                None => blank_line(&mut out),
            }
        }
        push_word(&mut out, 0);
        out
    }

    #[test]
    fn reader_yields_lines_then_end_of_frame() {
        let data = sprite(2, &[None, Some(&[0xAA, 0xBB, 0xCC, 0xDD])]);
        let mut reader = RleReader::new(&data).unwrap();
        assert!(matches!(reader.next_record().unwrap(), LineRecord::Line { data: &[], .. }));
        match reader.next_record().unwrap() {
            LineRecord::Line { data, .. } => assert_eq!(data, &[0xAA, 0xBB, 0xCC, 0xDD]),
            other => panic!("expected line, got {other:?}"),
        }
        assert!(matches!(reader.next_record().unwrap(), LineRecord::EndOfFrame));
    }

    #[test]
    fn truncated_payload_is_an_error() {
        let mut data = RleHeader::new(2, 1, 1).to_bytes().to_vec();
        push_word(&mut data, pack(Opcode::LineStart, 8));
        data.extend_from_slice(&[0xAA, 0xBB]);
        let mut reader = RleReader::new(&data).unwrap();
        assert!(reader.next_record().is_err());
    }

    #[test]
    fn trim_is_min_of_top_and_bottom_margins() {
        // blank, data, blank, blank -> top margin 1, bottom margin 2.
        let data = sprite(2, &[None, Some(&[0xAA, 0xBB]), None, None]);
        assert_eq!(compute_trim(&data).unwrap(), 1);
    }

    #[test]
    fn single_sided_blank_forces_zero() {
        let payload = [0u8; 4];
        let data = sprite(2, &[None, Some(&payload), Some(&payload), Some(&payload)]);
        assert_eq!(compute_trim(&data).unwrap(), 0);
    }

    #[test]
    fn all_blank_frames_cap_at_half_height() {
        let data = sprite(2, &[None, None, None, None, None, None]);
        assert_eq!(compute_trim(&data).unwrap(), 3);
    }

    #[test]
    fn trim_is_shared_across_frames() {
        let mut out = RleHeader::new(2, 4, 2).to_bytes().to_vec();
        // Frame 0: margins 2 top, 1 bottom.
        blank_line(&mut out);
        blank_line(&mut out);
        data_line(&mut out, &[0x01, 0x02]);
        blank_line(&mut out);
        push_word(&mut out, 0);
        // Frame 1: margins 1 top, 2 bottom.
        blank_line(&mut out);
        data_line(&mut out, &[0x03, 0x04]);
        blank_line(&mut out);
        blank_line(&mut out);
        push_word(&mut out, 0);
        assert_eq!(compute_trim(&out).unwrap(), 1);
    }

    #[test]
    fn frame_surfaces_decodes_runs_and_literals() {
        let green = Color::opaque(0, 0xFF, 0).rgb555();
        let word = green.to_rgb555_word();
        // 4 wide: transparent run of 1 pixel, literal of 1 pixel, run of 2.
        let mut body = Vec::new();
        push_word(&mut body, pack(Opcode::TransparentRun, 2));
        push_word(&mut body, pack(Opcode::PixelData, 2));
        body.extend_from_slice(&word.to_be_bytes());
        body.extend_from_slice(&[0, 0]); // dword padding
        push_word(&mut body, pack(Opcode::PixelRun, 4));
        push_word(&mut body, ((word as u32) << 16) | word as u32);

        let mut data = RleHeader::new(4, 2, 1).to_bytes().to_vec();
        data_line(&mut data, &body);
        blank_line(&mut data);
        push_word(&mut data, 0);

        let frames = frame_surfaces(&data).unwrap();
        assert_eq!(frames.len(), 1);
        let frame = &frames[0];
        assert_eq!(frame.at(0, 0), Color::TRANSPARENT);
        assert_eq!(frame.at(1, 0), green);
        assert_eq!(frame.at(2, 0), green);
        assert_eq!(frame.at(3, 0), green);
        for x in 0..4 {
            assert_eq!(frame.at(x, 1), Color::TRANSPARENT);
        }
    }
}
