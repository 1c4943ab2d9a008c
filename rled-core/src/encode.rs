use anyhow::bail;

use crate::decode::{compute_trim, LineRecord, RleReader};
use crate::format::{self, Opcode, RleHeader};
use crate::surface::{Color, Surface};

/// Re-emit a `rlëD` stream, optionally trimming blank lines off the top and
/// bottom of every frame.
///
/// Runs of blank source lines are written as individual zero-payload
/// `line_start` words, never coalesced; trailing blanks are dropped entirely
/// and each frame is closed with a single zero word. The caller compares
/// lengths and discards output that is not strictly smaller.
pub fn rewrite(data: &[u8], trim: bool) -> anyhow::Result<Vec<u8>> {
    let trim_lines = if trim { compute_trim(data)? } else { 0 };
    let mut reader = RleReader::new(data)?;
    let mut header = reader.header.clone();
    header.height -= trim_lines * 2;
    let mut out = Vec::with_capacity(data.len());
    out.extend_from_slice(&header.to_bytes());
    for _ in 0..header.frame_count {
        let mut skip = trim_lines;
        let mut blank = 0u32;
        loop {
            match reader.next_record()? {
                LineRecord::Line { word, data } => {
                    if skip > 0 {
                        skip -= 1;
                        continue;
                    }
                    if data.is_empty() {
                        blank += 1;
                    } else {
                        for _ in 0..blank {
                            out.extend_from_slice(&format::pack(Opcode::LineStart, 0).to_be_bytes());
                        }
                        blank = 0;
                        out.extend_from_slice(&word.to_be_bytes());
                        out.extend_from_slice(data);
                    }
                }
                LineRecord::EndOfFrame => {
                    out.extend_from_slice(&0u32.to_be_bytes());
                    break;
                }
            }
        }
    }
    Ok(out)
}

/// Encode a sprite/mask surface pair into a `rlëD`, one frame per
/// `frame_width x frame_height` grid cell, row-major.
///
/// Mask pixels that are pure black cut the sprite pixel to transparent; any
/// other mask value leaves it untouched. The sprite surface is modified in
/// place, so a dithered surface encodes its dithered pixels.
pub fn encode_sprite(
    sprite: &mut Surface,
    mask: &Surface,
    frame_width: u16,
    frame_height: u16,
) -> anyhow::Result<Vec<u8>> {
    if frame_width == 0 || frame_height == 0 {
        bail!("invalid frame size");
    }
    if sprite.width() != mask.width() || sprite.height() != mask.height() {
        bail!("mask does not match sprite");
    }
    let fw = frame_width as u32;
    let fh = frame_height as u32;
    if sprite.width() % fw != 0 || sprite.height() % fh != 0 {
        bail!("sprite does not match frame size");
    }
    let grid_x = sprite.width() / fw;
    let grid_y = sprite.height() / fh;
    if grid_x * grid_y > u16::MAX as u32 {
        bail!("sprite yields too many frames");
    }

    // Apply the mask
    for y in 0..sprite.height() {
        for x in 0..sprite.width() {
            if mask.at(x, y).is_black() {
                sprite.set(x, y, Color::TRANSPARENT);
            }
        }
    }

    let header = RleHeader::new(frame_width, frame_height, (grid_x * grid_y) as u16);
    let mut out = header.to_bytes().to_vec();
    let mut line = Vec::with_capacity(fw as usize);
    for gy in 0..grid_y {
        for gx in 0..grid_x {
            for fy in 0..fh {
                line.clear();
                for fx in 0..fw {
                    line.push(sprite.at(gx * fw + fx, gy * fh + fy));
                }
                pack_line(&line, &mut out);
            }
            out.extend_from_slice(&0u32.to_be_bytes());
        }
    }
    Ok(out)
}

/// Fewest identical pixels for which a pixel_run (8 bytes) beats staying in
/// a literal block.
const MIN_RUN: usize = 4;

/// Pack one row of pixels into a `line_start` record.
///
/// Transparent pixels become transparent_run opcodes (a trailing run is
/// implicit and omitted), repeated opaque pixels of `MIN_RUN` or more become
/// a pixel_run with the RGB555 word doubled into one dword, and everything
/// else lands in dword-padded pixel_data literals. A fully transparent row
/// is a blank line.
fn pack_line(pixels: &[Color], out: &mut Vec<u8>) {
    let mut body: Vec<u8> = Vec::new();
    let mut literal: Vec<u16> = Vec::new();
    let mut x = 0usize;
    while x < pixels.len() {
        if pixels[x].a == 0 {
            let start = x;
            while x < pixels.len() && pixels[x].a == 0 {
                x += 1;
            }
            flush_literal(&mut literal, &mut body);
            if x == pixels.len() {
                break;
            }
            let run_bytes = ((x - start) * 2) as u32;
            body.extend_from_slice(&format::pack(Opcode::TransparentRun, run_bytes).to_be_bytes());
        } else {
            let run_start = x;
            let color = pixels[x];
            while x < pixels.len() && pixels[x] == color {
                x += 1;
            }
            let run = x - run_start;
            if run >= MIN_RUN {
                flush_literal(&mut literal, &mut body);
                let word = color.to_rgb555_word() as u32;
                body.extend_from_slice(&format::pack(Opcode::PixelRun, (run * 2) as u32).to_be_bytes());
                body.extend_from_slice(&((word << 16) | word).to_be_bytes());
            } else {
                let word = color.to_rgb555_word();
                literal.extend(std::iter::repeat(word).take(run));
            }
        }
    }
    flush_literal(&mut literal, &mut body);
    out.extend_from_slice(&format::pack(Opcode::LineStart, body.len() as u32).to_be_bytes());
    out.extend_from_slice(&body);
}

fn flush_literal(literal: &mut Vec<u16>, body: &mut Vec<u8>) {
    if literal.is_empty() {
        return;
    }
    body.extend_from_slice(&format::pack(Opcode::PixelData, (literal.len() * 2) as u32).to_be_bytes());
    for word in literal.iter() {
        body.extend_from_slice(&word.to_be_bytes());
    }
    while body.len() % 4 != 0 {
        body.push(0);
    }
    literal.clear();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::frame_surfaces;
    use crate::dither::rgb555_dither;

    fn push_word(out: &mut Vec<u8>, word: u32) {
        out.extend_from_slice(&word.to_be_bytes());
    }

    #[test]
    fn trim_drops_shared_blank_margins() {
        // width=2, height=4, one frame: blank, 2-byte line, blank, blank.
        let mut data = RleHeader::new(2, 4, 1).to_bytes().to_vec();
        push_word(&mut data, format::pack(Opcode::LineStart, 0));
        push_word(&mut data, format::pack(Opcode::LineStart, 2));
        data.extend_from_slice(&[0xAA, 0xBB]);
        push_word(&mut data, format::pack(Opcode::LineStart, 0));
        push_word(&mut data, format::pack(Opcode::LineStart, 0));
        push_word(&mut data, 0);

        let out = rewrite(&data, true).unwrap();

        let mut expected = RleHeader::new(2, 2, 1).to_bytes().to_vec();
        push_word(&mut expected, format::pack(Opcode::LineStart, 2));
        expected.extend_from_slice(&[0xAA, 0xBB]);
        push_word(&mut expected, 0);
        assert_eq!(out, expected);
    }

    #[test]
    fn untrimmable_stream_rewrites_to_equal_bytes() {
        // No blank margins, no trailing blanks: the rewrite is the identity.
        let mut data = RleHeader::new(2, 2, 2).to_bytes().to_vec();
        for payload in [[0x11u8, 0x22], [0x33, 0x44], [0x55, 0x66], [0x77, 0x88]] {
            push_word(&mut data, format::pack(Opcode::LineStart, 2));
            data.extend_from_slice(&payload);
            if payload == [0x33, 0x44] || payload == [0x77, 0x88] {
                push_word(&mut data, 0);
            }
        }
        let out = rewrite(&data, true).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn interior_blanks_survive_trailing_blanks_do_not() {
        let mut data = RleHeader::new(2, 3, 1).to_bytes().to_vec();
        push_word(&mut data, format::pack(Opcode::LineStart, 2));
        data.extend_from_slice(&[0x0A, 0x0B]);
        push_word(&mut data, format::pack(Opcode::LineStart, 0));
        push_word(&mut data, format::pack(Opcode::LineStart, 0));
        push_word(&mut data, 0);

        let out = rewrite(&data, false).unwrap();

        // Height unchanged, both trailing blanks gone from the stream.
        let header = RleHeader::from_bytes(&out).unwrap();
        assert_eq!(header.height, 3);
        assert_eq!(out.len(), data.len() - 8);

        let mut interior = RleHeader::new(2, 3, 1).to_bytes().to_vec();
        push_word(&mut interior, format::pack(Opcode::LineStart, 0));
        push_word(&mut interior, format::pack(Opcode::LineStart, 2));
        interior.extend_from_slice(&[0x0A, 0x0B]);
        push_word(&mut interior, format::pack(Opcode::LineStart, 0));
        push_word(&mut interior, 0);
        let out = rewrite(&interior, false).unwrap();
        // The interior blank is re-emitted; only the trailing one is dropped.
        assert_eq!(out.len(), interior.len() - 4);
        let trimmed = compute_trim(&interior).unwrap();
        assert_eq!(trimmed, 1);
    }

    #[test]
    fn trim_applies_symmetrically_to_every_frame() {
        let mut data = RleHeader::new(2, 4, 2).to_bytes().to_vec();
        for payload in [[0x01u8, 0x02], [0x03, 0x04]] {
            push_word(&mut data, format::pack(Opcode::LineStart, 0));
            push_word(&mut data, format::pack(Opcode::LineStart, 2));
            data.extend_from_slice(&payload);
            push_word(&mut data, format::pack(Opcode::LineStart, 0));
            push_word(&mut data, format::pack(Opcode::LineStart, 0));
            push_word(&mut data, 0);
        }

        let out = rewrite(&data, true).unwrap();
        let header = RleHeader::from_bytes(&out).unwrap();
        assert_eq!(header.height, 2);
        assert_eq!(header.frame_count, 2);

        // Each frame decodes to height - 2t line records at most, with the
        // non-blank payloads intact.
        let mut reader = RleReader::new(&out).unwrap();
        for expected in [[0x01u8, 0x02], [0x03, 0x04]] {
            let mut lines = 0;
            loop {
                match reader.next_record().unwrap() {
                    LineRecord::Line { data, .. } => {
                        if !data.is_empty() {
                            assert_eq!(data, expected);
                        }
                        lines += 1;
                    }
                    LineRecord::EndOfFrame => break,
                }
            }
            assert!(lines <= 2);
        }
    }

    #[test]
    fn encode_shape_matches_grid() {
        // 4x4 solid green sprite, solid white mask, 2x2 frames.
        let mut sprite = Surface::new(4, 4);
        sprite.fill(Color::opaque(0, 0xFF, 0));
        let mut mask = Surface::new(4, 4);
        mask.fill(Color::opaque(0xFF, 0xFF, 0xFF));
        rgb555_dither(&mut sprite);
        let data = encode_sprite(&mut sprite, &mask, 2, 2).unwrap();

        let header = RleHeader::from_bytes(&data).unwrap();
        assert_eq!(header.width, 2);
        assert_eq!(header.height, 2);
        assert_eq!(header.frame_count, 4);

        let green = Color::opaque(0, 0xFF, 0).rgb555();
        let frames = frame_surfaces(&data).unwrap();
        assert_eq!(frames.len(), 4);
        for frame in &frames {
            for y in 0..2 {
                for x in 0..2 {
                    assert_eq!(frame.at(x, y), green);
                }
            }
        }
    }

    #[test]
    fn mask_cutout_is_black_only() {
        // 2x2 solid red sprite, checkerboard mask.
        let red = Color::opaque(0xFF, 0, 0);
        let mut sprite = Surface::new(2, 2);
        sprite.fill(red);
        let mut mask = Surface::new(2, 2);
        mask.set(0, 0, Color::opaque(0, 0, 0));
        mask.set(1, 0, Color::opaque(0xFF, 0xFF, 0xFF));
        mask.set(0, 1, Color::opaque(0xFF, 0xFF, 0xFF));
        mask.set(1, 1, Color::opaque(0, 0, 0));
        let data = encode_sprite(&mut sprite, &mask, 2, 2).unwrap();

        let frames = frame_surfaces(&data).unwrap();
        assert_eq!(frames.len(), 1);
        let frame = &frames[0];
        let red555 = red.rgb555();
        assert_eq!(frame.at(0, 0), Color::TRANSPARENT);
        assert_eq!(frame.at(1, 0), red555);
        assert_eq!(frame.at(0, 1), red555);
        assert_eq!(frame.at(1, 1), Color::TRANSPARENT);
    }

    #[test]
    fn grey_mask_pixels_do_not_cut() {
        let red = Color::opaque(0xFF, 0, 0);
        let mut sprite = Surface::new(1, 1);
        sprite.fill(red);
        let mut mask = Surface::new(1, 1);
        mask.fill(Color::opaque(0x80, 0x80, 0x80));
        let data = encode_sprite(&mut sprite, &mask, 1, 1).unwrap();
        let frames = frame_surfaces(&data).unwrap();
        assert_eq!(frames[0].at(0, 0), red);
    }

    #[test]
    fn fully_masked_frames_are_all_blank_lines() {
        let mut sprite = Surface::new(2, 2);
        sprite.fill(Color::opaque(0xFF, 0xFF, 0xFF));
        let mut mask = Surface::new(2, 2);
        mask.fill(Color::opaque(0, 0, 0));
        let data = encode_sprite(&mut sprite, &mask, 2, 2).unwrap();
        // Header, two blank line words, terminator.
        assert_eq!(data.len(), 16 + 4 + 4 + 4);
        assert_eq!(compute_trim(&data).unwrap(), 1);
    }

    #[test]
    fn long_runs_become_pixel_runs() {
        let blue = Color::opaque(0, 0, 0xF8);
        let mut sprite = Surface::new(8, 1);
        sprite.fill(blue);
        let mut mask = Surface::new(8, 1);
        mask.fill(Color::opaque(0xFF, 0xFF, 0xFF));
        let data = encode_sprite(&mut sprite, &mask, 8, 1).unwrap();
        // Header + line_start + pixel_run opcode + one doubled dword + terminator.
        assert_eq!(data.len(), 16 + 4 + 4 + 4 + 4);
        let frames = frame_surfaces(&data).unwrap();
        for x in 0..8 {
            assert_eq!(frames[0].at(x, 0), blue.rgb555());
        }
    }

    #[test]
    fn encoder_rejects_bad_inputs() {
        let mut sprite = Surface::new(4, 4);
        let mask = Surface::new(4, 4);
        assert!(encode_sprite(&mut sprite, &mask, 0, 2).is_err());
        let small_mask = Surface::new(2, 4);
        assert!(encode_sprite(&mut sprite, &small_mask, 2, 2).is_err());
        assert!(encode_sprite(&mut sprite, &mask, 3, 2).is_err());
    }
}
