use std::collections::BTreeMap;
use std::io::Cursor;
use std::path::Path;

use anyhow::{bail, Context};
use byteorder::{BigEndian, ReadBytesExt};

use rled_core::format::{mac_roman_to_string, string_to_mac_roman, FourCc};
use rled_core::map::ResourceMap;

/// Container flavours the tool recognizes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContainerFormat {
    /// Classic resource fork layout (`.rsrc`, `.ndat`, `.npif`, raw forks).
    Classic,
    /// EV Nova rez archive. Detected but not supported.
    Rez,
}

#[derive(Debug)]
struct Entry {
    name: Option<String>,
    attributes: u8,
    data: Vec<u8>,
}

/// An in-memory resource container parsed from a classic resource fork.
#[derive(Debug)]
pub struct ResourceFile {
    format: ContainerFormat,
    types: BTreeMap<FourCc, BTreeMap<i16, Entry>>,
}

const DATA_START: usize = 0x100;
const MAP_HEADER_SIZE: usize = 28;

impl ResourceFile {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let data = std::fs::read(path).with_context(|| format!("failed to open {}", path.display()))?;
        Self::parse(&data)
    }

    pub fn parse(data: &[u8]) -> anyhow::Result<Self> {
        if data.starts_with(b"BRGR") {
            bail!("rez archives are not supported");
        }
        if data.len() < 16 {
            bail!("too short to be a resource fork");
        }
        let mut r = Cursor::new(data);
        let data_offset = r.read_u32::<BigEndian>()? as usize;
        let map_offset = r.read_u32::<BigEndian>()? as usize;
        let data_len = r.read_u32::<BigEndian>()? as usize;
        let map_len = r.read_u32::<BigEndian>()? as usize;
        if data_offset.checked_add(data_len).map_or(true, |end| end > data.len())
            || map_offset.checked_add(map_len).map_or(true, |end| end > data.len())
            || map_len < MAP_HEADER_SIZE + 2
        {
            bail!("resource fork header is inconsistent");
        }
        let map = &data[map_offset..map_offset + map_len];

        // Map header: 16 reserved bytes, handle, file ref, attributes, then
        // the two list offsets.
        let mut r = Cursor::new(&map[24..]);
        let type_list_offset = r.read_u16::<BigEndian>()? as usize;
        let name_list_offset = r.read_u16::<BigEndian>()? as usize;

        let type_list = map
            .get(type_list_offset..)
            .context("type list offset out of range")?;
        let mut r = Cursor::new(type_list);
        let type_count = r.read_u16::<BigEndian>()?.wrapping_add(1) as usize;

        let mut types: BTreeMap<FourCc, BTreeMap<i16, Entry>> = BTreeMap::new();
        for _ in 0..type_count {
            let mut code = [0u8; 4];
            std::io::Read::read_exact(&mut r, &mut code)?;
            let count = r.read_u16::<BigEndian>()?.wrapping_add(1) as usize;
            let ref_offset = r.read_u16::<BigEndian>()? as usize;

            let refs = type_list
                .get(ref_offset..)
                .context("reference list offset out of range")?;
            let mut refs = Cursor::new(refs);
            let entries = types.entry(FourCc(code)).or_default();
            for _ in 0..count {
                let id = refs.read_i16::<BigEndian>()?;
                let name_offset = refs.read_u16::<BigEndian>()?;
                let packed = refs.read_u32::<BigEndian>()?;
                let attributes = (packed >> 24) as u8;
                let offset = (packed & 0x00FF_FFFF) as usize;
                refs.read_u32::<BigEndian>()?; // reserved handle

                let res_data = read_data_entry(data, data_offset, offset)?;
                let name = if name_offset == 0xFFFF {
                    None
                } else {
                    Some(read_name(map, name_list_offset + name_offset as usize)?)
                };
                entries.insert(
                    id,
                    Entry {
                        name,
                        attributes,
                        data: res_data,
                    },
                );
            }
        }
        Ok(ResourceFile {
            format: ContainerFormat::Classic,
            types,
        })
    }

    pub fn current_format(&self) -> ContainerFormat {
        self.format
    }

    pub fn write(&self, path: &Path, format: ContainerFormat) -> anyhow::Result<()> {
        if format == ContainerFormat::Rez {
            bail!("rez archives are not supported");
        }
        let bytes = self.to_bytes()?;
        std::fs::write(path, bytes).with_context(|| format!("failed to write {}", path.display()))
    }

    pub fn to_bytes(&self) -> anyhow::Result<Vec<u8>> {
        let resource_count: usize = self.types.values().map(|m| m.len()).sum();
        let type_count = self.types.len();

        // Data area
        let mut data_area = Vec::new();
        let mut offsets: Vec<usize> = Vec::with_capacity(resource_count);
        for entries in self.types.values() {
            for entry in entries.values() {
                offsets.push(data_area.len());
                data_area.extend_from_slice(&(entry.data.len() as u32).to_be_bytes());
                data_area.extend_from_slice(&entry.data);
            }
        }
        if data_area.len() > 0x00FF_FFFF {
            bail!("data area exceeds the 24-bit offset limit");
        }

        // Name list
        let mut name_list = Vec::new();
        let mut name_offsets: Vec<u16> = Vec::with_capacity(resource_count);
        for entries in self.types.values() {
            for entry in entries.values() {
                match &entry.name {
                    Some(name) => {
                        let raw = string_to_mac_roman(name);
                        let len = raw.len().min(255);
                        name_offsets.push(name_list.len() as u16);
                        name_list.push(len as u8);
                        name_list.extend_from_slice(&raw[..len]);
                    }
                    None => name_offsets.push(0xFFFF),
                }
            }
        }

        let type_list_len = 2 + 8 * type_count + 12 * resource_count;
        let name_list_offset = MAP_HEADER_SIZE + type_list_len;
        if name_list_offset + name_list.len() > 0xFFFF {
            bail!("resource map exceeds the 16-bit offset limit");
        }

        // Map
        let mut map = vec![0u8; MAP_HEADER_SIZE];
        map[24..26].copy_from_slice(&(MAP_HEADER_SIZE as u16).to_be_bytes());
        map[26..28].copy_from_slice(&(name_list_offset as u16).to_be_bytes());

        map.extend_from_slice(&(type_count as u16).wrapping_sub(1).to_be_bytes());
        let mut ref_offset = 2 + 8 * type_count;
        for (code, entries) in &self.types {
            map.extend_from_slice(&code.0);
            map.extend_from_slice(&(entries.len() as u16).wrapping_sub(1).to_be_bytes());
            map.extend_from_slice(&(ref_offset as u16).to_be_bytes());
            ref_offset += 12 * entries.len();
        }
        let mut index = 0usize;
        for entries in self.types.values() {
            for (id, entry) in entries {
                map.extend_from_slice(&id.to_be_bytes());
                map.extend_from_slice(&name_offsets[index].to_be_bytes());
                let packed = ((entry.attributes as u32) << 24) | offsets[index] as u32;
                map.extend_from_slice(&packed.to_be_bytes());
                map.extend_from_slice(&0u32.to_be_bytes());
                index += 1;
            }
        }
        map.extend_from_slice(&name_list);

        // File: header, padding to 0x100, data, map.
        let map_offset = DATA_START + data_area.len();
        let mut out = Vec::with_capacity(map_offset + map.len());
        out.extend_from_slice(&(DATA_START as u32).to_be_bytes());
        out.extend_from_slice(&(map_offset as u32).to_be_bytes());
        out.extend_from_slice(&(data_area.len() as u32).to_be_bytes());
        out.extend_from_slice(&(map.len() as u32).to_be_bytes());
        out.resize(DATA_START, 0);
        out.extend_from_slice(&data_area);
        out.extend_from_slice(&map);
        Ok(out)
    }
}

fn read_data_entry(data: &[u8], data_offset: usize, offset: usize) -> anyhow::Result<Vec<u8>> {
    let start = data_offset
        .checked_add(offset)
        .context("resource data offset overflow")?;
    let len_bytes = data
        .get(start..start + 4)
        .context("resource data offset out of range")?;
    let len = u32::from_be_bytes(len_bytes.try_into().unwrap()) as usize;
    let bytes = data
        .get(start + 4..start + 4 + len)
        .context("resource data length out of range")?;
    Ok(bytes.to_vec())
}

fn read_name(map: &[u8], offset: usize) -> anyhow::Result<String> {
    let len = *map.get(offset).context("name offset out of range")? as usize;
    let bytes = map
        .get(offset + 1..offset + 1 + len)
        .context("name length out of range")?;
    Ok(mac_roman_to_string(bytes))
}

impl ResourceMap for ResourceFile {
    fn type_codes(&self) -> Vec<FourCc> {
        self.types.keys().copied().collect()
    }

    fn ids(&self, code: FourCc) -> Vec<i16> {
        self.types
            .get(&code)
            .map(|m| m.keys().copied().collect())
            .unwrap_or_default()
    }

    fn data(&self, code: FourCc, id: i16) -> Option<&[u8]> {
        self.types.get(&code)?.get(&id).map(|e| e.data.as_slice())
    }

    fn name(&self, code: FourCc, id: i16) -> Option<String> {
        self.types.get(&code)?.get(&id)?.name.clone()
    }

    fn set_data(&mut self, code: FourCc, id: i16, data: Vec<u8>) {
        if let Some(entry) = self.types.get_mut(&code).and_then(|m| m.get_mut(&id)) {
            entry.data = data;
        }
    }

    fn add(&mut self, code: FourCc, id: i16, name: Option<String>, data: Vec<u8>) {
        self.types.entry(code).or_default().insert(
            id,
            Entry {
                name,
                attributes: 0,
                data,
            },
        );
    }

    fn remove(&mut self, code: FourCc, id: i16) {
        if let Some(entries) = self.types.get_mut(&code) {
            entries.remove(&id);
            if entries.is_empty() {
                self.types.remove(&code);
            }
        }
    }
}
