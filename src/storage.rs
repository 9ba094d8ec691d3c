use crate::config::StorageConfig;
use async_trait::async_trait;
use std::{
    fmt, io,
    path::{Component, Path, PathBuf},
    str::FromStr,
};
use thiserror::Error;

const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];
const SCHEME: &str = "gs://";

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Invalid image reference `{0}`")]
    InvalidReference(String),
    #[error("Unknown bucket `{0}`")]
    UnknownBucket(String),
    #[error("Image `{0}` not found")]
    NotFound(String),
    #[error("Image source unavailable: {0}")]
    Unavailable(#[from] io::Error),
}

/// A `gs://<bucket>/<object>` reference to an image in the object store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageRef {
    bucket: String,
    object: String,
}

impl ImageRef {
    pub fn new(bucket: &str, object: &str) -> Result<Self, StorageError> {
        let reference = || format!("{}{}/{}", SCHEME, bucket, object);
        if bucket.is_empty() || bucket.contains('/') || object.is_empty() {
            return Err(StorageError::InvalidReference(reference()));
        }

        let escapes = Path::new(object)
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
        if escapes {
            return Err(StorageError::InvalidReference(reference()));
        }

        Ok(Self {
            bucket: bucket.to_string(),
            object: object.to_string(),
        })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn object(&self) -> &str {
        &self.object
    }

    pub fn is_image(&self) -> bool {
        Path::new(&self.object)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| {
                IMAGE_EXTENSIONS
                    .iter()
                    .any(|known| ext.eq_ignore_ascii_case(known))
            })
            .unwrap_or(false)
    }
}

impl FromStr for ImageRef {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = s
            .strip_prefix(SCHEME)
            .ok_or_else(|| StorageError::InvalidReference(s.to_string()))?;
        let (bucket, object) = rest
            .split_once('/')
            .ok_or_else(|| StorageError::InvalidReference(s.to_string()))?;
        Self::new(bucket, object)
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}/{}", SCHEME, self.bucket, self.object)
    }
}

#[async_trait]
pub trait ImageStore: Send + Sync + 'static {
    fn bucket(&self) -> &str;

    /// Every image object in the bucket, sorted by object name.
    async fn list_images(&self) -> Result<Vec<ImageRef>, StorageError>;

    async fn fetch(&self, image: &ImageRef) -> Result<Vec<u8>, StorageError>;
}

/// Bucket backed by a local directory: object names are paths relative to
/// `root_dir`.
#[derive(Debug, Clone)]
pub struct LocalBucket {
    bucket: String,
    root_dir: PathBuf,
}

impl LocalBucket {
    pub fn new(config: &StorageConfig) -> Self {
        Self {
            bucket: config.bucket.clone(),
            root_dir: config.root_dir.clone(),
        }
    }

    fn object_name(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.root_dir).ok()?;
        let parts: Vec<&str> = relative
            .components()
            .map(|c| c.as_os_str().to_str())
            .collect::<Option<_>>()?;
        Some(parts.join("/"))
    }
}

#[async_trait]
impl ImageStore for LocalBucket {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn list_images(&self) -> Result<Vec<ImageRef>, StorageError> {
        let mut images = Vec::new();
        let mut pending = vec![self.root_dir.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = tokio::fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if entry.file_type().await?.is_dir() {
                    pending.push(path);
                    continue;
                }

                let Some(object) = self.object_name(&path) else {
                    tracing::warn!("Skipping non UTF-8 object path {:?}", path);
                    continue;
                };
                let image = ImageRef::new(&self.bucket, &object)?;
                if image.is_image() {
                    images.push(image);
                }
            }
        }

        images.sort_by(|a, b| a.object.cmp(&b.object));
        Ok(images)
    }

    async fn fetch(&self, image: &ImageRef) -> Result<Vec<u8>, StorageError> {
        if image.bucket != self.bucket {
            return Err(StorageError::UnknownBucket(image.bucket.clone()));
        }

        match tokio::fs::read(self.root_dir.join(&image.object)).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(image.to_string()))
            }
            Err(e) => Err(StorageError::Unavailable(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bucket_in(dir: &Path) -> LocalBucket {
        LocalBucket::new(&StorageConfig {
            bucket: "garden_genie_image".to_string(),
            root_dir: dir.to_path_buf(),
        })
    }

    #[test]
    fn test_parse_reference() {
        let image: ImageRef = "gs://garden_genie_image/pots/croton.JPG".parse().unwrap();

        assert_eq!(image.bucket(), "garden_genie_image");
        assert_eq!(image.object(), "pots/croton.JPG");
        assert!(image.is_image());
        assert_eq!(image.to_string(), "gs://garden_genie_image/pots/croton.JPG");
    }

    #[test]
    fn test_parse_rejects_malformed_references() {
        for input in [
            "garden_genie_image/croton.jpg",
            "gs://garden_genie_image",
            "gs:///croton.jpg",
            "gs://garden_genie_image/",
            "gs://garden_genie_image/../secret.jpg",
            "gs://garden_genie_image//etc/passwd",
        ] {
            assert!(
                matches!(input.parse::<ImageRef>(), Err(StorageError::InvalidReference(_))),
                "{input} should be rejected"
            );
        }
    }

    #[test]
    fn test_is_image_by_extension() {
        let txt = ImageRef::new("b", "notes.txt").unwrap();
        let png = ImageRef::new("b", "leaf.png").unwrap();
        let bare = ImageRef::new("b", "README").unwrap();

        assert!(!txt.is_image());
        assert!(png.is_image());
        assert!(!bare.is_image());
    }

    #[tokio::test]
    async fn test_list_images_filters_and_sorts() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        std::fs::create_dir(dir.path().join("pots"))?;
        std::fs::write(dir.path().join("zebra.png"), b"x")?;
        std::fs::write(dir.path().join("notes.txt"), b"x")?;
        std::fs::write(dir.path().join("pots").join("fig.jpeg"), b"x")?;
        std::fs::write(dir.path().join("Aloe.JPG"), b"x")?;

        let images = bucket_in(dir.path()).list_images().await?;
        let urls: Vec<String> = images.iter().map(ImageRef::to_string).collect();

        assert_eq!(
            urls,
            vec![
                "gs://garden_genie_image/Aloe.JPG",
                "gs://garden_genie_image/pots/fig.jpeg",
                "gs://garden_genie_image/zebra.png",
            ]
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_list_images_reports_missing_root() {
        let bucket = bucket_in(Path::new("./no_such_bucket_dir"));
        assert!(matches!(
            bucket.list_images().await,
            Err(StorageError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_fetch() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        std::fs::write(dir.path().join("fig.jpg"), b"jpeg bytes")?;
        let bucket = bucket_in(dir.path());

        let found = bucket
            .fetch(&"gs://garden_genie_image/fig.jpg".parse()?)
            .await?;
        assert_eq!(found, b"jpeg bytes");

        let missing = bucket
            .fetch(&"gs://garden_genie_image/missing.jpg".parse()?)
            .await;
        assert!(matches!(missing, Err(StorageError::NotFound(_))));

        let other = bucket.fetch(&"gs://other_bucket/fig.jpg".parse()?).await;
        assert!(matches!(other, Err(StorageError::UnknownBucket(_))));
        Ok(())
    }
}
