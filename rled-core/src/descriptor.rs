use std::io::{Cursor, Seek, SeekFrom};

use byteorder::{BigEndian, ReadBytesExt};

/// `spïn` sprite-index record — six big-endian i16s, 12 bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Spin {
    pub sprite_id: i16,
    pub mask_id: i16,
    pub frame_width: i16,
    pub frame_height: i16,
    pub grid_x: i16,
    pub grid_y: i16,
}

impl Spin {
    pub fn parse(data: &[u8]) -> anyhow::Result<Self> {
        let mut r = Cursor::new(data);
        Ok(Spin {
            sprite_id: r.read_i16::<BigEndian>()?,
            mask_id: r.read_i16::<BigEndian>()?,
            frame_width: r.read_i16::<BigEndian>()?,
            frame_height: r.read_i16::<BigEndian>()?,
            grid_x: r.read_i16::<BigEndian>()?,
            grid_y: r.read_i16::<BigEndian>()?,
        })
    }
}

/// One sub-sprite slot in a `shän` record. A non-positive sprite or mask id
/// marks an empty slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ShanLayer {
    pub sprite_id: i16,
    pub mask_id: i16,
    pub frame_width: i16,
    pub frame_height: i16,
}

/// `shän` ship-sprite record: six sub-sprite slots interleaved with set
/// counts, a frames-per field, and reverse-engineered padding spans that are
/// skipped as opaque.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Shan {
    pub base: ShanLayer,
    pub base_set_count: i16,
    pub alt: ShanLayer,
    pub alt_set_count: i16,
    pub engine: ShanLayer,
    pub light: ShanLayer,
    pub weapon: ShanLayer,
    pub frames_per: i16,
    pub shield: ShanLayer,
}

impl Shan {
    pub fn parse(data: &[u8]) -> anyhow::Result<Self> {
        let mut r = Cursor::new(data);

        let base_sprite_id = r.read_i16::<BigEndian>()?;
        let base_mask_id = r.read_i16::<BigEndian>()?;
        let base_set_count = r.read_i16::<BigEndian>()?;
        let base = ShanLayer {
            sprite_id: base_sprite_id,
            mask_id: base_mask_id,
            frame_width: r.read_i16::<BigEndian>()?,
            frame_height: r.read_i16::<BigEndian>()?,
        };
        r.seek(SeekFrom::Current(2))?;

        let alt_sprite_id = r.read_i16::<BigEndian>()?;
        let alt_mask_id = r.read_i16::<BigEndian>()?;
        let alt_set_count = r.read_i16::<BigEndian>()?;
        let alt = ShanLayer {
            sprite_id: alt_sprite_id,
            mask_id: alt_mask_id,
            frame_width: r.read_i16::<BigEndian>()?,
            frame_height: r.read_i16::<BigEndian>()?,
        };

        let engine = read_layer(&mut r)?;
        let light = read_layer(&mut r)?;
        let weapon = read_layer(&mut r)?;

        r.seek(SeekFrom::Current(6))?;
        let frames_per = r.read_i16::<BigEndian>()?;
        r.seek(SeekFrom::Current(10))?;

        let shield = read_layer(&mut r)?;

        Ok(Shan {
            base,
            base_set_count,
            alt,
            alt_set_count,
            engine,
            light,
            weapon,
            frames_per,
            shield,
        })
    }

    /// Slots in base, alt, engine, light, weapon, shield order.
    pub fn layers(&self) -> [ShanLayer; 6] {
        [self.base, self.alt, self.engine, self.light, self.weapon, self.shield]
    }
}

fn read_layer(r: &mut Cursor<&[u8]>) -> anyhow::Result<ShanLayer> {
    Ok(ShanLayer {
        sprite_id: r.read_i16::<BigEndian>()?,
        mask_id: r.read_i16::<BigEndian>()?,
        frame_width: r.read_i16::<BigEndian>()?,
        frame_height: r.read_i16::<BigEndian>()?,
    })
}
