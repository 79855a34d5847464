/*++

Licensed under the Apache-2.0 license.

--*/
use crate::{PatchBuilder, PatchImage, SegmentKind};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::Path;

/// TOML description of a patch image: the header strings plus one record
/// list per segment. Each record names the file holding its payload bytes.
#[derive(Debug, Deserialize, Serialize, Default, Clone)]
pub struct PatchManifest {
    pub description: String,
    pub version: String,
    #[serde(default)]
    pub loader: Vec<RecordEntry>,
    #[serde(default)]
    pub cpx: Vec<RecordEntry>,
    #[serde(default)]
    pub spx: Vec<RecordEntry>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct RecordEntry {
    pub addr: u32,
    pub file: String,
    #[serde(skip)]
    pub data: Option<Vec<u8>>, // Payload bytes, filled in when an image is decoded
}

impl PatchManifest {
    pub fn parse_manifest_file(file_path: &str) -> io::Result<Self> {
        let manifest_contents = fs::read_to_string(file_path)?;
        let manifest: PatchManifest = toml::de::from_str(&manifest_contents)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        manifest
            .verify()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        Ok(manifest)
    }

    fn verify(&self) -> Result<(), String> {
        if self.description.len() > 24 {
            return Err(format!(
                "description is {} bytes, the header holds at most 24",
                self.description.len()
            ));
        }
        if self.version.len() != 5 {
            return Err(format!(
                "version must be exactly 5 bytes, got {:?}",
                self.version
            ));
        }
        Ok(())
    }

    fn version_bytes(&self) -> Result<[u8; 5], String> {
        self.version
            .as_bytes()
            .try_into()
            .map_err(|_| format!("version must be exactly 5 bytes, got {:?}", self.version))
    }

    fn entries(&self, kind: SegmentKind) -> &[RecordEntry] {
        match kind {
            SegmentKind::Loader => &self.loader,
            SegmentKind::Cpx => &self.cpx,
            SegmentKind::Spx => &self.spx,
        }
    }

    fn entries_mut(&mut self, kind: SegmentKind) -> &mut Vec<RecordEntry> {
        match kind {
            SegmentKind::Loader => &mut self.loader,
            SegmentKind::Cpx => &mut self.cpx,
            SegmentKind::Spx => &mut self.spx,
        }
    }

    /// Encodes the manifest into a binary patch image. Record payloads come
    /// from the `data` field when present, otherwise from the named file.
    pub fn generate_patch_image(&self, output_path: &str) -> io::Result<()> {
        println!("Generating patch image: {}", output_path);
        let version = self
            .version_bytes()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        let mut builder = PatchBuilder::new()
            .description(&self.description)
            .version(version);
        for kind in SegmentKind::ALL {
            for entry in self.entries(kind) {
                let payload = match &entry.data {
                    Some(data) => data.clone(),
                    None => fs::read(&entry.file)?,
                };
                builder = builder.record(kind, entry.addr, &payload);
            }
        }
        fs::write(output_path, builder.build())
    }

    /// Decodes a binary patch image back into a manifest. When an output
    /// directory is given, the manifest TOML and one payload file per record
    /// are written there.
    pub fn decode_patch_image(image_path: &str, output_dir_path: Option<&str>) -> io::Result<Self> {
        if let Some(output_dir_path) = output_dir_path {
            match fs::metadata(output_dir_path) {
                Ok(metadata) => {
                    if !metadata.is_dir() {
                        return Err(io::Error::new(
                            io::ErrorKind::InvalidInput,
                            format!("{} is not a directory", output_dir_path),
                        ));
                    }
                }
                Err(_) => {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidInput,
                        format!("{} does not exist", output_dir_path),
                    ));
                }
            }
        }

        let image_bytes = fs::read(image_path)?;
        let image = PatchImage::parse(&image_bytes)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        let mut manifest = PatchManifest {
            description: image.description(),
            version: image.version_string(),
            ..Default::default()
        };
        for kind in SegmentKind::ALL {
            for (index, record) in image.records(kind).enumerate() {
                let record =
                    record.map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
                let preview = hex::encode(&record.data[..record.data.len().min(8)]);
                println!(
                    "  {} record {}: addr {:#010x}, {} bytes [{}..]",
                    kind,
                    index,
                    record.addr,
                    record.data.len(),
                    preview
                );
                manifest.entries_mut(kind).push(RecordEntry {
                    addr: record.addr,
                    file: format!("{}_{:03}.bin", kind, index),
                    data: Some(record.data.to_vec()),
                });
            }
        }

        if let Some(output_dir_path) = output_dir_path {
            let dir = Path::new(output_dir_path);
            for kind in SegmentKind::ALL {
                for entry in manifest.entries(kind) {
                    if let Some(data) = &entry.data {
                        fs::write(dir.join(&entry.file), data)?;
                    }
                }
            }
            let manifest_toml = toml::to_string_pretty(&manifest)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            fs::write(dir.join("manifest.toml"), manifest_toml)?;
        }

        Ok(manifest)
    }
}
