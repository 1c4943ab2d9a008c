use std::io::{Cursor, Read, Seek, SeekFrom};

use anyhow::{bail, ensure, Context};
use byteorder::{BigEndian, ReadBytesExt};

use rled_core::map::{Pict, PictCodec};
use rled_core::surface::{Color, Surface};

/// QuickDraw version-2 picture codec.
///
/// Decodes the pixel ops sprite and scenery PICTs actually use
/// (PackBitsRect with an embedded colour table, DirectBitsRect at 16 or 32
/// bits) and re-encodes pictures in one normalized form: a single
/// DirectBitsRect, 16-bit PackBits16 rows when reducing, 32-bit
/// three-component PackBits rows otherwise.
pub struct QuickDrawCodec;

#[derive(Debug)]
pub struct PictImage {
    format: u32,
    surface: Surface,
}

impl PictCodec for QuickDrawCodec {
    type Pict = PictImage;

    fn decode(&self, data: &[u8]) -> anyhow::Result<PictImage> {
        parse(data)
    }
}

impl Pict for PictImage {
    fn format(&self) -> u32 {
        self.format
    }

    fn surface(&self) -> &Surface {
        &self.surface
    }

    fn surface_mut(&mut self) -> &mut Surface {
        &mut self.surface
    }

    fn data(&self, reduce_to_16: bool) -> anyhow::Result<Vec<u8>> {
        encode(&self.surface, reduce_to_16)
    }
}

#[derive(Clone, Copy, Debug)]
struct Rect {
    top: i16,
    left: i16,
    bottom: i16,
    right: i16,
}

impl Rect {
    fn read(r: &mut Cursor<&[u8]>) -> anyhow::Result<Self> {
        Ok(Rect {
            top: r.read_i16::<BigEndian>()?,
            left: r.read_i16::<BigEndian>()?,
            bottom: r.read_i16::<BigEndian>()?,
            right: r.read_i16::<BigEndian>()?,
        })
    }

    fn width(&self) -> i32 {
        self.right as i32 - self.left as i32
    }

    fn height(&self) -> i32 {
        self.bottom as i32 - self.top as i32
    }
}

fn skip(r: &mut Cursor<&[u8]>, n: i64) -> anyhow::Result<()> {
    r.seek(SeekFrom::Current(n))?;
    Ok(())
}

fn parse(data: &[u8]) -> anyhow::Result<PictImage> {
    let mut r = Cursor::new(data);
    let _pic_size = r.read_u16::<BigEndian>()?;
    let frame = Rect::read(&mut r)?;
    ensure!(frame.width() > 0 && frame.height() > 0, "empty picture frame");
    ensure!(
        frame.width() <= 8192 && frame.height() <= 8192,
        "unreasonable picture frame {}x{}",
        frame.width(),
        frame.height()
    );
    ensure!(
        r.read_u16::<BigEndian>()? == 0x0011 && r.read_u16::<BigEndian>()? == 0x02FF,
        "not a version 2 picture"
    );

    let mut surface = Surface::new(frame.width() as u32, frame.height() as u32);
    let mut format = 0u32;
    loop {
        // Opcodes are word-aligned.
        if r.position() % 2 == 1 {
            skip(&mut r, 1)?;
        }
        let op = r.read_u16::<BigEndian>()?;
        match op {
            0x0000 => {}                      // NOP
            0x001C | 0x001E => {}             // HiliteMode, DefHilite
            0x0C00 => skip(&mut r, 24)?,      // HeaderOp
            0x0001 => {
                // Clip region
                let size = r.read_u16::<BigEndian>()? as i64;
                ensure!(size >= 2, "bad region size");
                skip(&mut r, size - 2)?;
            }
            0x001A | 0x001B | 0x001F => skip(&mut r, 6)?, // RGB fg/bk/op colours
            0x0098 | 0x0099 => blit(&mut r, &mut surface, &frame, false, op == 0x0099, &mut format)?,
            0x009A | 0x009B => blit(&mut r, &mut surface, &frame, true, op == 0x009B, &mut format)?,
            0x00A0 => skip(&mut r, 2)?, // ShortComment
            0x00A1 => {
                let _kind = r.read_u16::<BigEndian>()?;
                let size = r.read_u16::<BigEndian>()? as i64;
                skip(&mut r, size)?;
            }
            0x00FF => break, // OpEndPic
            0x8200 | 0x8201 => bail!("QuickTime-compressed picture"),
            _ => bail!("unsupported picture opcode 0x{op:04X}"),
        }
    }
    ensure!(format != 0, "picture contains no pixel data");
    Ok(PictImage { format, surface })
}

/// Decode one PackBitsRect/DirectBitsRect blit and composite it at its
/// destination rectangle.
fn blit(
    r: &mut Cursor<&[u8]>,
    surface: &mut Surface,
    frame: &Rect,
    direct: bool,
    has_region: bool,
    format: &mut u32,
) -> anyhow::Result<()> {
    if direct {
        let _base_addr = r.read_u32::<BigEndian>()?;
    }
    let row_bytes_raw = r.read_u16::<BigEndian>()?;
    let is_pixmap = row_bytes_raw & 0x8000 != 0;
    let row_bytes = (row_bytes_raw & 0x3FFF) as usize;
    let bounds = Rect::read(r)?;
    ensure!(bounds.width() > 0 && bounds.height() > 0, "empty pixmap bounds");

    let mut pixel_size = 1u16;
    let mut pack_type = 0u16;
    let mut cmp_count = 1u16;
    let mut table = vec![Color::opaque(0, 0, 0); 256];
    if is_pixmap {
        let _pm_version = r.read_u16::<BigEndian>()?;
        pack_type = r.read_u16::<BigEndian>()?;
        let _pack_size = r.read_u32::<BigEndian>()?;
        let _h_res = r.read_u32::<BigEndian>()?;
        let _v_res = r.read_u32::<BigEndian>()?;
        let _pixel_type = r.read_u16::<BigEndian>()?;
        pixel_size = r.read_u16::<BigEndian>()?;
        cmp_count = r.read_u16::<BigEndian>()?;
        let _cmp_size = r.read_u16::<BigEndian>()?;
        let _plane_bytes = r.read_u32::<BigEndian>()?;
        let _pm_table = r.read_u32::<BigEndian>()?;
        let _pm_reserved = r.read_u32::<BigEndian>()?;
        if !direct {
            // Embedded colour table.
            let _seed = r.read_u32::<BigEndian>()?;
            let _flags = r.read_u16::<BigEndian>()?;
            let count = r.read_u16::<BigEndian>()?.wrapping_add(1) as usize;
            ensure!(count <= 256, "oversized colour table");
            for i in 0..count {
                let value = r.read_u16::<BigEndian>()? as usize;
                let red = r.read_u16::<BigEndian>()?;
                let green = r.read_u16::<BigEndian>()?;
                let blue = r.read_u16::<BigEndian>()?;
                let index = if value < 256 { value } else { i };
                table[index] = Color::opaque((red >> 8) as u8, (green >> 8) as u8, (blue >> 8) as u8);
            }
        }
    } else {
        // Old-style 1-bit bitmap: set bits are black on white.
        table[0] = Color::opaque(0xFF, 0xFF, 0xFF);
        table[1] = Color::opaque(0, 0, 0);
    }

    let src = Rect::read(r)?;
    let dst = Rect::read(r)?;
    let _mode = r.read_u16::<BigEndian>()?;
    if has_region {
        let size = r.read_u16::<BigEndian>()? as i64;
        ensure!(size >= 2, "bad region size");
        skip(r, size - 2)?;
    }

    // Expected unpacked bytes per row.
    let unpacked_len = match (pixel_size, pack_type) {
        (32, 4) | (32, 0) => row_bytes / 4 * cmp_count as usize,
        (32, 2) => row_bytes / 4 * 3,
        _ => row_bytes,
    };

    let height = bounds.height() as usize;
    let raw_rows = row_bytes < 8 || pack_type == 1;
    let mut rows: Vec<Vec<u8>> = Vec::with_capacity(height);
    for _ in 0..height {
        if raw_rows {
            let mut row = vec![0u8; row_bytes];
            r.read_exact(&mut row)?;
            rows.push(row);
        } else if pack_type == 2 {
            let mut row = vec![0u8; unpacked_len];
            r.read_exact(&mut row)?;
            rows.push(row);
        } else {
            let count = if row_bytes > 250 {
                r.read_u16::<BigEndian>()? as usize
            } else {
                r.read_u8()? as usize
            };
            let mut packed = vec![0u8; count];
            r.read_exact(&mut packed)?;
            let row = if pixel_size == 16 {
                unpack_bits16(&packed, unpacked_len)?
            } else {
                unpack_bits(&packed, unpacked_len)?
            };
            rows.push(row);
        }
    }

    // Composite at the destination rect, relative to the picture frame.
    let dx = dst.left as i32 - frame.left as i32;
    let dy = dst.top as i32 - frame.top as i32;
    let sx = src.left as i32 - bounds.left as i32;
    let sy = src.top as i32 - bounds.top as i32;
    let copy_w = src.width().min(dst.width());
    let copy_h = src.height().min(dst.height());
    for y in 0..copy_h {
        let Some(row) = usize::try_from(sy + y).ok().and_then(|i| rows.get(i)) else {
            continue;
        };
        for x in 0..copy_w {
            let src_x = sx + x;
            if src_x < 0 {
                continue;
            }
            let Some(color) =
                pixel_at(row, src_x as usize, pixel_size, cmp_count, pack_type, raw_rows, &table)
            else {
                continue;
            };
            let tx = dx + x;
            let ty = dy + y;
            if tx >= 0 && ty >= 0 && (tx as u32) < surface.width() && (ty as u32) < surface.height() {
                surface.set(tx as u32, ty as u32, color);
            }
        }
    }
    *format = (*format).max(pixel_size as u32);
    Ok(())
}

fn pixel_at(
    row: &[u8],
    x: usize,
    pixel_size: u16,
    cmp_count: u16,
    pack_type: u16,
    raw_rows: bool,
    table: &[Color],
) -> Option<Color> {
    match pixel_size {
        1 => {
            let byte = row.get(x / 8)?;
            Some(table[((byte >> (7 - x % 8)) & 1) as usize])
        }
        2 => {
            let byte = row.get(x / 4)?;
            Some(table[((byte >> (6 - 2 * (x % 4))) & 0x03) as usize])
        }
        4 => {
            let byte = row.get(x / 2)?;
            Some(table[((byte >> (4 - 4 * (x % 2))) & 0x0F) as usize])
        }
        8 => Some(table[*row.get(x)? as usize]),
        16 => {
            let hi = *row.get(x * 2)?;
            let lo = *row.get(x * 2 + 1)?;
            Some(Color::from_rgb555_word(u16::from_be_bytes([hi, lo])))
        }
        32 if pack_type == 2 => Some(Color::opaque(
            *row.get(x * 3)?,
            *row.get(x * 3 + 1)?,
            *row.get(x * 3 + 2)?,
        )),
        32 if raw_rows => {
            // Unpacked rows are interleaved xRGB dwords.
            Some(Color::opaque(
                *row.get(x * 4 + 1)?,
                *row.get(x * 4 + 2)?,
                *row.get(x * 4 + 3)?,
            ))
        }
        32 => {
            // Component planes per row; alpha-first when four components.
            let planes = cmp_count as usize;
            let stride = row.len() / planes.max(1);
            let offset = if planes == 4 { stride } else { 0 };
            Some(Color::opaque(
                *row.get(offset + x)?,
                *row.get(offset + stride + x)?,
                *row.get(offset + stride * 2 + x)?,
            ))
        }
        _ => None,
    }
}

/// Encode a surface as a normalized version-2 picture holding a single
/// DirectBitsRect.
pub fn encode(surface: &Surface, reduce_to_16: bool) -> anyhow::Result<Vec<u8>> {
    let width = surface.width() as usize;
    let height = surface.height() as usize;
    ensure!(width > 0 && height > 0, "empty surface");
    ensure!(width <= 4095 && height <= 4095, "surface too large for a picture");

    let mut out = Vec::new();
    let push_u16 = |out: &mut Vec<u8>, v: u16| out.extend_from_slice(&v.to_be_bytes());
    let push_u32 = |out: &mut Vec<u8>, v: u32| out.extend_from_slice(&v.to_be_bytes());
    let push_rect = |out: &mut Vec<u8>, w: usize, h: usize| {
        out.extend_from_slice(&0i16.to_be_bytes());
        out.extend_from_slice(&0i16.to_be_bytes());
        out.extend_from_slice(&(h as i16).to_be_bytes());
        out.extend_from_slice(&(w as i16).to_be_bytes());
    };

    push_u16(&mut out, 0); // picSize, patched below
    push_rect(&mut out, width, height);
    push_u16(&mut out, 0x0011); // VersionOp
    push_u16(&mut out, 0x02FF);
    push_u16(&mut out, 0x0C00); // HeaderOp
    push_u16(&mut out, 0xFFFE);
    push_u16(&mut out, 0);
    push_u32(&mut out, 0x0048_0000); // 72 dpi
    push_u32(&mut out, 0x0048_0000);
    push_rect(&mut out, width, height);
    push_u32(&mut out, 0);
    push_u16(&mut out, 0x001E); // DefHilite
    push_u16(&mut out, 0x0001); // Clip
    push_u16(&mut out, 0x000A);
    push_rect(&mut out, width, height);

    push_u16(&mut out, 0x009A); // DirectBitsRect
    push_u32(&mut out, 0x0000_00FF);
    let (pixel_size, pack_type, cmp_size, row_bytes) = if reduce_to_16 {
        (16u16, 3u16, 5u16, width * 2)
    } else {
        (32u16, 4u16, 8u16, width * 4)
    };
    push_u16(&mut out, row_bytes as u16 | 0x8000);
    push_rect(&mut out, width, height);
    push_u16(&mut out, 0); // pmVersion
    push_u16(&mut out, pack_type);
    push_u32(&mut out, 0); // packSize
    push_u32(&mut out, 0x0048_0000);
    push_u32(&mut out, 0x0048_0000);
    push_u16(&mut out, 16); // pixelType: direct
    push_u16(&mut out, pixel_size);
    push_u16(&mut out, 3); // cmpCount
    push_u16(&mut out, cmp_size);
    push_u32(&mut out, 0);
    push_u32(&mut out, 0);
    push_u32(&mut out, 0);
    push_rect(&mut out, width, height); // srcRect
    push_rect(&mut out, width, height); // dstRect
    push_u16(&mut out, 0); // srcCopy

    // Rows narrower than 8 bytes are stored unpacked, with no byte counts.
    if reduce_to_16 {
        let mut row = Vec::with_capacity(width);
        for y in 0..height as u32 {
            row.clear();
            for x in 0..width as u32 {
                row.push(surface.at(x, y).to_rgb555_word());
            }
            if row_bytes < 8 {
                for word in &row {
                    push_u16(&mut out, *word);
                }
                continue;
            }
            let packed = pack_bits16(&row);
            if row_bytes > 250 {
                push_u16(&mut out, packed.len() as u16);
            } else {
                out.push(packed.len() as u8);
            }
            out.extend_from_slice(&packed);
        }
    } else {
        let mut row = vec![0u8; width * 3];
        for y in 0..height as u32 {
            if row_bytes < 8 {
                for x in 0..width as u32 {
                    let c = surface.at(x, y);
                    out.extend_from_slice(&[0, c.r, c.g, c.b]);
                }
                continue;
            }
            for x in 0..width as u32 {
                let c = surface.at(x, y);
                row[x as usize] = c.r;
                row[width + x as usize] = c.g;
                row[width * 2 + x as usize] = c.b;
            }
            let packed = pack_bits(&row);
            if row_bytes > 250 {
                push_u16(&mut out, packed.len() as u16);
            } else {
                out.push(packed.len() as u8);
            }
            out.extend_from_slice(&packed);
        }
    }

    if out.len() % 2 == 1 {
        out.push(0);
    }
    push_u16(&mut out, 0x00FF); // OpEndPic

    let size = (out.len() & 0xFFFF) as u16;
    out[0..2].copy_from_slice(&size.to_be_bytes());
    Ok(out)
}

fn unpack_bits(packed: &[u8], expected: usize) -> anyhow::Result<Vec<u8>> {
    let mut out = Vec::with_capacity(expected);
    let mut pos = 0usize;
    while pos < packed.len() && out.len() < expected {
        let flag = packed[pos] as i8;
        pos += 1;
        if flag == -128 {
            continue;
        }
        if flag < 0 {
            let count = 1 - flag as isize;
            let byte = *packed.get(pos).context("run overruns packed row")?;
            pos += 1;
            out.extend(std::iter::repeat(byte).take(count as usize));
        } else {
            let count = flag as usize + 1;
            let bytes = packed
                .get(pos..pos + count)
                .context("literal overruns packed row")?;
            pos += count;
            out.extend_from_slice(bytes);
        }
    }
    out.resize(expected, 0);
    Ok(out)
}

fn unpack_bits16(packed: &[u8], expected: usize) -> anyhow::Result<Vec<u8>> {
    let mut out = Vec::with_capacity(expected);
    let mut pos = 0usize;
    while pos < packed.len() && out.len() < expected {
        let flag = packed[pos] as i8;
        pos += 1;
        if flag == -128 {
            continue;
        }
        if flag < 0 {
            let count = (1 - flag as isize) as usize;
            let word = packed
                .get(pos..pos + 2)
                .context("run overruns packed row")?;
            pos += 2;
            for _ in 0..count {
                out.extend_from_slice(word);
            }
        } else {
            let count = (flag as usize + 1) * 2;
            let bytes = packed
                .get(pos..pos + count)
                .context("literal overruns packed row")?;
            pos += count;
            out.extend_from_slice(bytes);
        }
    }
    out.resize(expected, 0);
    Ok(out)
}

fn pack_bits(row: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut i = 0usize;
    while i < row.len() {
        let mut j = i + 1;
        while j < row.len() && row[j] == row[i] && j - i < 128 {
            j += 1;
        }
        let run = j - i;
        if run >= 3 {
            out.push((1 - run as i32) as u8);
            out.push(row[i]);
            i = j;
        } else {
            let start = i;
            let mut k = i;
            while k < row.len() && k - start < 128 {
                if k + 2 < row.len() && row[k] == row[k + 1] && row[k + 1] == row[k + 2] {
                    break;
                }
                k += 1;
            }
            out.push((k - start - 1) as u8);
            out.extend_from_slice(&row[start..k]);
            i = k;
        }
    }
    out
}

fn pack_bits16(row: &[u16]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut i = 0usize;
    while i < row.len() {
        let mut j = i + 1;
        while j < row.len() && row[j] == row[i] && j - i < 128 {
            j += 1;
        }
        let run = j - i;
        if run >= 2 {
            out.push((1 - run as i32) as u8);
            out.extend_from_slice(&row[i].to_be_bytes());
            i = j;
        } else {
            let start = i;
            let mut k = i;
            while k < row.len() && k - start < 128 {
                if k + 1 < row.len() && row[k] == row[k + 1] {
                    break;
                }
                k += 1;
            }
            out.push((k - start - 1) as u8);
            for word in &row[start..k] {
                out.extend_from_slice(&word.to_be_bytes());
            }
            i = k;
        }
    }
    out
}
