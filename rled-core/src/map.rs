use crate::format::FourCc;
use crate::surface::Surface;

/// A typed, numbered resource container, as exposed by the container codec.
///
/// Enumeration methods return snapshots: a pass collects ids at entry and
/// may then add, replace, or remove resources without invalidating anything
/// it is iterating.
pub trait ResourceMap {
    /// Type codes present, in container order.
    fn type_codes(&self) -> Vec<FourCc>;

    /// Ids of every resource of one type, in container order.
    fn ids(&self, code: FourCc) -> Vec<i16>;

    fn data(&self, code: FourCc, id: i16) -> Option<&[u8]>;

    fn name(&self, code: FourCc, id: i16) -> Option<String>;

    /// Replace a resource's bytes. Absent resources are ignored.
    fn set_data(&mut self, code: FourCc, id: i16, data: Vec<u8>);

    /// Add a resource; an existing resource with the same type and id is
    /// replaced.
    fn add(&mut self, code: FourCc, id: i16, name: Option<String>, data: Vec<u8>);

    fn remove(&mut self, code: FourCc, id: i16);
}

/// A decoded PICT. One owner for the pixel surface, with a borrowable
/// mutable view, so dithering the surface feeds straight into re-encoding.
pub trait Pict {
    /// Pixel depth 1/2/4/8/16/24/32, or a four-byte code above 32 for
    /// non-standard container forms such as QuickTime.
    fn format(&self) -> u32;

    fn surface(&self) -> &Surface;

    fn surface_mut(&mut self) -> &mut Surface;

    /// Re-encode the picture, optionally reducing to 16-bit.
    fn data(&self, reduce_to_16: bool) -> anyhow::Result<Vec<u8>>;
}

/// Decodes PICT resource bytes into pictures.
pub trait PictCodec {
    type Pict: Pict;

    fn decode(&self, data: &[u8]) -> anyhow::Result<Self::Pict>;
}
