// 🎽 Dorsal - Identifier tokens and their scannable images
// Token is pure and reproducible; rendering is delegated to a DorsalEncoder

use crate::error::{Processo, RegistryError, RegistryResult};
use qrcode::render::svg;
use qrcode::QrCode;
use std::fs;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

// ============================================================================
// TOKEN ISSUER
// ============================================================================

/// What the dorsal QR code carries
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TokenMode {
    /// Human-readable bib description
    #[default]
    Descriptive,
    /// Finish-line URL; scanning it posts the arrival
    ArrivalUrl { base_url: String },
}

#[derive(Debug, Clone, Default)]
pub struct TokenIssuer {
    mode: TokenMode,
}

impl TokenIssuer {
    pub fn new(mode: TokenMode) -> Self {
        TokenIssuer { mode }
    }

    pub fn mode(&self) -> &TokenMode {
        &self.mode
    }

    /// Same inputs always give the same token
    pub fn issue(&self, processo: Processo, nome: &str) -> String {
        match &self.mode {
            TokenMode::Descriptive => format!("Corta-Mato ESM | Nº {} | {}", processo, nome.trim()),
            TokenMode::ArrivalUrl { base_url } => {
                let separator = if base_url.contains('?') { '&' } else { '?' };
                format!("{}{}processo={}", base_url.trim_end_matches('/'), separator, processo)
            }
        }
    }
}

// ============================================================================
// IMAGE ENCODER
// ============================================================================

pub trait DorsalEncoder: Send + Sync {
    /// File extension of rendered artifacts (without the dot)
    fn extension(&self) -> &'static str;

    fn render(&self, token: &str) -> RegistryResult<Vec<u8>>;
}

/// QR code rendered as an SVG document
#[derive(Debug, Clone)]
pub struct SvgQrEncoder {
    pub min_size: u32,
}

impl Default for SvgQrEncoder {
    fn default() -> Self {
        SvgQrEncoder { min_size: 200 }
    }
}

impl DorsalEncoder for SvgQrEncoder {
    fn extension(&self) -> &'static str {
        "svg"
    }

    fn render(&self, token: &str) -> RegistryResult<Vec<u8>> {
        let code = QrCode::new(token.as_bytes())
            .map_err(|e| RegistryError::Storage(format!("qr encoding failed: {}", e)))?;

        let image = code
            .render::<svg::Color>()
            .min_dimensions(self.min_size, self.min_size)
            .build();

        Ok(image.into_bytes())
    }
}

// ============================================================================
// IMAGE STORE
// ============================================================================

/// One rendered image per registration, named by processo
pub struct DorsalStore {
    dir: PathBuf,
    encoder: Box<dyn DorsalEncoder>,
}

impl DorsalStore {
    pub fn new<P: Into<PathBuf>>(dir: P, encoder: Box<dyn DorsalEncoder>) -> RegistryResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(DorsalStore { dir, encoder })
    }

    pub fn with_svg<P: Into<PathBuf>>(dir: P) -> RegistryResult<Self> {
        Self::new(dir, Box::new(SvgQrEncoder::default()))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn file_name(&self, processo: Processo) -> String {
        format!("{}.{}", processo, self.encoder.extension())
    }

    pub fn path_for(&self, processo: Processo) -> PathBuf {
        self.dir.join(self.file_name(processo))
    }

    /// Render and write the image, replacing any previous artifact
    pub fn write(&self, processo: Processo, token: &str) -> RegistryResult<PathBuf> {
        let bytes = self.encoder.render(token)?;
        let path = self.path_for(processo);

        // Write-then-rename so readers never see a half-written image
        let tmp = self.dir.join(format!(".{}.tmp", self.file_name(processo)));
        fs::write(&tmp, &bytes)?;
        fs::rename(&tmp, &path)?;

        debug!(processo, path = ?path, "dorsal written");
        Ok(path)
    }

    pub fn read(&self, processo: Processo) -> RegistryResult<Vec<u8>> {
        let path = self.path_for(processo);
        fs::read(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => RegistryError::not_found(processo),
            _ => e.into(),
        })
    }

    /// Read the image, re-rendering it from the token if the file is gone
    pub fn read_or_render(&self, processo: Processo, token: &str) -> RegistryResult<Vec<u8>> {
        match self.read(processo) {
            Err(RegistryError::NotFound(_)) => {
                self.write(processo, token)?;
                self.read(processo)
            }
            other => other,
        }
    }

    pub fn remove(&self, processo: Processo) -> RegistryResult<()> {
        match fs::remove_file(self.path_for(processo)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove every rendered image; returns how many were deleted
    pub fn clear(&self) -> RegistryResult<usize> {
        let mut removed = 0;
        for path in self.image_paths()? {
            fs::remove_file(&path)?;
            removed += 1;
        }
        Ok(removed)
    }

    fn image_paths(&self) -> RegistryResult<Vec<PathBuf>> {
        let ext = self.encoder.extension();
        let mut paths: Vec<PathBuf> = fs::read_dir(&self.dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file() && p.extension().and_then(|e| e.to_str()) == Some(ext))
            .collect();
        paths.sort();
        Ok(paths)
    }

    /// Zip archive of all rendered images (bulk export)
    pub fn archive(&self) -> RegistryResult<Vec<u8>> {
        let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Deflated);

        for path in self.image_paths()? {
            let name = match path.file_name().and_then(|n| n.to_str()) {
                Some(name) => name.to_string(),
                None => continue,
            };
            zip.start_file(name, options)?;
            zip.write_all(&fs::read(&path)?)?;
        }

        let cursor = zip.finish()?;
        Ok(cursor.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn test_descriptive_token_is_reproducible() {
        let issuer = TokenIssuer::default();

        let first = issuer.issue(42, "Ana Silva");
        let second = issuer.issue(42, " Ana Silva ");

        assert_eq!(first, "Corta-Mato ESM | Nº 42 | Ana Silva");
        assert_eq!(first, second);
    }

    #[test]
    fn test_arrival_url_token() {
        let issuer = TokenIssuer::new(TokenMode::ArrivalUrl {
            base_url: "https://corta-mato.escola.pt/chegada/".to_string(),
        });
        assert_eq!(
            issuer.issue(42, "Ana"),
            "https://corta-mato.escola.pt/chegada?processo=42"
        );

        let issuer = TokenIssuer::new(TokenMode::ArrivalUrl {
            base_url: "http://localhost:3000/chegada?prova=1".to_string(),
        });
        assert_eq!(
            issuer.issue(7, "Rui"),
            "http://localhost:3000/chegada?prova=1&processo=7"
        );
    }

    #[test]
    fn test_svg_encoder_renders_svg() {
        let bytes = SvgQrEncoder::default().render("Corta-Mato ESM | Nº 1 | Ana").unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.contains("<svg"));
    }

    #[test]
    fn test_store_write_read_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = DorsalStore::with_svg(dir.path().join("dorsais")).unwrap();

        let path = store.write(42, "token-42").unwrap();
        assert!(path.ends_with("42.svg"));
        assert!(!store.read(42).unwrap().is_empty());

        store.remove(42).unwrap();
        assert!(matches!(store.read(42), Err(RegistryError::NotFound(_))));
        // Removing twice is fine
        store.remove(42).unwrap();
    }

    #[test]
    fn test_read_or_render_regenerates_missing_image() {
        let dir = tempfile::tempdir().unwrap();
        let store = DorsalStore::with_svg(dir.path()).unwrap();

        let bytes = store.read_or_render(9, "token-9").unwrap();
        assert!(!bytes.is_empty());
        assert!(store.path_for(9).exists());
    }

    #[test]
    fn test_archive_contains_every_image() {
        let dir = tempfile::tempdir().unwrap();
        let store = DorsalStore::with_svg(dir.path()).unwrap();
        store.write(1, "a").unwrap();
        store.write(2, "b").unwrap();

        let bytes = store.archive().unwrap();
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();

        assert_eq!(archive.len(), 2);
        let mut content = String::new();
        archive
            .by_name("1.svg")
            .unwrap()
            .read_to_string(&mut content)
            .unwrap();
        assert!(content.contains("<svg"));

        assert_eq!(store.clear().unwrap(), 2);
        assert_eq!(store.clear().unwrap(), 0);
    }
}
