use crate::descriptor::{Shan, Spin};
use crate::dither::rgb555_dither;
use crate::encode::{encode_sprite, rewrite};
use crate::format::{FourCc, RleHeader, TYPE_PICT, TYPE_RLE, TYPE_SHAN, TYPE_SPIN};
use crate::map::{Pict, PictCodec, ResourceMap};

/// Option flags threaded into each pipeline call.
#[derive(Clone, Copy, Debug)]
pub struct Options {
    /// Trim shared blank lines off frame tops and bottoms.
    pub trim: bool,
    /// Rewrite PICTs in a normalized form.
    pub picts: bool,
    /// Reduce PICT depth to 16-bit.
    pub reduce: bool,
    /// Encode rlëDs from spïn/shän descriptors and their PICTs.
    pub encode: bool,
    /// Dither when reducing to 16-bit.
    pub dither: bool,
    pub verbose: bool,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            trim: false,
            picts: false,
            reduce: false,
            encode: false,
            dither: true,
            verbose: false,
        }
    }
}

/// Outcome of processing one container.
#[derive(Clone, Copy, Debug, Default)]
pub struct Report {
    pub rle_saved: i64,
    pub pict_saved: i64,
    /// rlëDs encoded from descriptors.
    pub encoded: usize,
    /// Resources whose bytes were replaced, added, or removed.
    pub modified: usize,
}

impl Report {
    pub fn changed(&self) -> bool {
        self.modified > 0
    }
}

/// Run the enabled passes over one container in their fixed order.
///
/// When both encode and trim are set, the descriptor passes run first so the
/// rlëD pass can trim the freshly encoded sprites; with encode alone they
/// run afterwards, since untrimmed output needs no second look.
pub fn process_container<M: ResourceMap, C: PictCodec>(
    map: &mut M,
    codec: &C,
    options: &Options,
) -> Report {
    let mut report = Report::default();
    if options.encode && options.trim {
        encode_pass(map, codec, options, TYPE_SPIN, &mut report);
        encode_pass(map, codec, options, TYPE_SHAN, &mut report);
    }
    rle_pass(map, options, &mut report);
    if options.encode && !options.trim {
        encode_pass(map, codec, options, TYPE_SPIN, &mut report);
        encode_pass(map, codec, options, TYPE_SHAN, &mut report);
    }
    if options.picts {
        pict_pass(map, codec, options, &mut report);
    }
    report
}

fn rle_pass<M: ResourceMap>(map: &mut M, options: &Options, report: &mut Report) {
    let ids = map.ids(TYPE_RLE);
    if ids.is_empty() {
        return;
    }
    if options.verbose {
        println!("rlëD ID  Frames  Height      Size  New Height  New Size   Saved  Action");
    }
    let mut saved = 0i64;
    for id in &ids {
        match rewrite_rle(map, options, *id) {
            Ok(diff) => {
                if diff > 0 {
                    saved += diff;
                    report.modified += 1;
                }
            }
            Err(err) => eprintln!("{} {}: {}", TYPE_RLE, id, err),
        }
    }
    report.rle_saved = saved;
    println!("Saved {} bytes from {} rlëDs.", saved, ids.len());
}

fn rewrite_rle<M: ResourceMap>(map: &mut M, options: &Options, id: i16) -> anyhow::Result<i64> {
    let Some(data) = map.data(TYPE_RLE, id) else {
        return Ok(0);
    };
    let header = RleHeader::from_bytes(data)?;
    let old_size = data.len();
    let new = rewrite(data, options.trim)?;
    let new_height = RleHeader::from_bytes(&new)?.height;
    let diff = old_size as i64 - new.len() as i64;
    if options.verbose {
        let action = if diff > 0 { "Written" } else { "Not written" };
        let pc = diff as f64 * 100.0 / old_size as f64;
        println!(
            "{:7}  {:6}  {:6}  {:8}  {:10}  {:8}  {:5.1}%  {}",
            id,
            header.frame_count,
            header.height,
            old_size,
            new_height,
            new.len(),
            pc,
            action
        );
    }
    if diff > 0 {
        map.set_data(TYPE_RLE, id, new);
        return Ok(diff);
    }
    Ok(0)
}

fn encode_pass<M: ResourceMap, C: PictCodec>(
    map: &mut M,
    codec: &C,
    options: &Options,
    code: FourCc,
    report: &mut Report,
) {
    let ids = map.ids(code);
    if ids.is_empty() {
        return;
    }
    if options.verbose {
        println!("{} ID  rlëD ID  Frames   Width  Height  Sprite Size  Mask Size  rlëD Size", code);
    }
    let mut encoded = 0usize;
    for id in &ids {
        match encode_descriptor(map, codec, options, code, *id) {
            Ok(n) => encoded += n,
            Err(err) => eprintln!("{} {}: {}", code, id, err),
        }
    }
    report.encoded += encoded;
    report.modified += encoded;
    println!("Encoded {} rlëDs from {} {}s.", encoded, ids.len(), code);
}

fn encode_descriptor<M: ResourceMap, C: PictCodec>(
    map: &mut M,
    codec: &C,
    options: &Options,
    code: FourCc,
    id: i16,
) -> anyhow::Result<usize> {
    let Some(data) = map.data(code, id) else {
        return Ok(0);
    };
    if code == TYPE_SPIN {
        let spin = Spin::parse(data)?;
        if spin.frame_width <= 0 || spin.frame_height <= 0 || spin.grid_x <= 0 || spin.grid_y <= 0 {
            anyhow::bail!("non-positive frame or grid size");
        }
        let done = encode_layer(
            map,
            codec,
            options,
            code,
            id,
            spin.sprite_id,
            spin.mask_id,
            spin.frame_width,
            spin.frame_height,
        )?;
        Ok(done as usize)
    } else {
        let shan = Shan::parse(data)?;
        let mut encoded = 0;
        for layer in shan.layers() {
            encoded += encode_layer(
                map,
                codec,
                options,
                code,
                id,
                layer.sprite_id,
                layer.mask_id,
                layer.frame_width,
                layer.frame_height,
            )? as usize;
        }
        Ok(encoded)
    }
}

/// Encode one sprite/mask PICT pair into a rlëD stored under the sprite id.
///
/// Returns whether a rlëD was added. Cross-resource mismatches are reported
/// here and skipped; PICT decode failures propagate to the per-resource
/// handler.
fn encode_layer<M: ResourceMap, C: PictCodec>(
    map: &mut M,
    codec: &C,
    options: &Options,
    code: FourCc,
    id: i16,
    sprite_id: i16,
    mask_id: i16,
    frame_width: i16,
    frame_height: i16,
) -> anyhow::Result<bool> {
    if sprite_id <= 0 || mask_id <= 0 {
        // Empty descriptor slot.
        return Ok(false);
    }
    if frame_width <= 0 || frame_height <= 0 {
        eprintln!("Invalid frame size in {} {}.", code, id);
        return Ok(false);
    }
    let (mut sprite_pict, sprite_size) = match map.data(TYPE_PICT, sprite_id) {
        Some(data) => (codec.decode(data)?, data.len()),
        None => {
            eprintln!("No sprite PICT {} for {} {}.", sprite_id, code, id);
            return Ok(false);
        }
    };
    let (mask_pict, mask_size) = match map.data(TYPE_PICT, mask_id) {
        Some(data) => (codec.decode(data)?, data.len()),
        None => {
            eprintln!("No mask PICT {} for {} {}.", mask_id, code, id);
            return Ok(false);
        }
    };
    let fw = frame_width as u16;
    let fh = frame_height as u16;
    let sprite_format = sprite_pict.format();
    let mask = mask_pict.surface();
    let sprite = sprite_pict.surface_mut();
    if mask.width() != sprite.width() || mask.height() != sprite.height() {
        eprintln!("Mask PICT {} for {} {} does not match sprite size.", mask_id, code, id);
        return Ok(false);
    }
    if sprite.width() % fw as u32 != 0 || sprite.height() % fh as u32 != 0 {
        eprintln!("Sprite PICT {} for {} {} does not match frame size.", sprite_id, code, id);
        return Ok(false);
    }
    let frames = (sprite.width() / fw as u32) * (sprite.height() / fh as u32);

    if options.dither && sprite_format != 16 {
        rgb555_dither(sprite);
    }
    let rle_data = encode_sprite(sprite, mask, fw, fh)?;

    if options.verbose {
        println!(
            "{:7}  {:7}  {:6}  {:6}  {:6}  {:11}  {:9}  {:9}",
            id,
            sprite_id,
            frames,
            fw,
            fh,
            sprite_size,
            mask_size,
            rle_data.len()
        );
    }
    let name = map.name(TYPE_PICT, sprite_id);
    map.add(TYPE_RLE, sprite_id, name, rle_data);

    // Remove the PICTs
    map.remove(TYPE_PICT, sprite_id);
    map.remove(TYPE_PICT, mask_id);
    Ok(true)
}

fn pict_pass<M: ResourceMap, C: PictCodec>(
    map: &mut M,
    codec: &C,
    options: &Options,
    report: &mut Report,
) {
    let ids = map.ids(TYPE_PICT);
    if ids.is_empty() {
        return;
    }
    if options.verbose {
        println!("PICT ID  Type        Size  New Type  New Size   Saved  Action");
    }
    let mut saved = 0i64;
    for id in &ids {
        match normalize_pict(map, codec, options, *id) {
            Ok(Some(diff)) => {
                saved += diff;
                report.modified += 1;
            }
            Ok(None) => {}
            Err(err) => eprintln!("{} {}: {}", TYPE_PICT, id, err),
        }
    }
    report.pict_saved = saved;
    println!("Saved {} bytes from {} PICTs.", saved, ids.len());
}

fn normalize_pict<M: ResourceMap, C: PictCodec>(
    map: &mut M,
    codec: &C,
    options: &Options,
    id: i16,
) -> anyhow::Result<Option<i64>> {
    let Some(data) = map.data(TYPE_PICT, id) else {
        return Ok(None);
    };
    let old_size = data.len();
    let mut pict = codec.decode(data)?;
    let format = pict.format();
    // Don't dither low depth images
    if options.reduce && options.dither && format > 4 && format != 16 {
        rgb555_dither(pict.surface_mut());
    }
    let reduce = options.reduce || format == 16;
    let new = pict.data(reduce)?;
    let diff = old_size as i64 - new.len() as i64;
    // Non-standard (QuickTime) pictures and depth reductions are written
    // even when the new form is no smaller.
    let save = diff > 0 || format > 32 || (options.reduce && format != 16);
    if options.verbose {
        let out_format = if reduce { 16 } else { 32 };
        let action = if save {
            if diff > 0 { "Written" } else { "Written (forced)" }
        } else {
            "Not written"
        };
        let pc = diff as f64 * 100.0 / old_size as f64;
        println!(
            "{:7}  {:<6}  {:8}  {:<8}  {:8}  {:5.1}%  {}",
            id,
            format_name(format),
            old_size,
            format_name(out_format),
            new.len(),
            pc,
            action
        );
    }
    if save {
        map.set_data(TYPE_PICT, id, new);
        return Ok(Some(diff));
    }
    Ok(None)
}

fn format_name(format: u32) -> String {
    if format > 32 {
        FourCc(format.to_be_bytes()).to_string()
    } else {
        format!("{}-bit", format)
    }
}
