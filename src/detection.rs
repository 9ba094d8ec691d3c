use std::{
    fs::File,
    io::{self, BufRead},
    path::Path,
    sync::Arc,
};

const PLANT_CLASSES: [&str; 14] = [
    "Clusia",
    "Fan-Palms",
    "Lvicks plant",
    "Pachira",
    "Wind orchid",
    "caladium",
    "carnation",
    "creeping fig",
    "croton",
    "eucalyptus",
    "freesia",
    "geranium",
    "poinsettia",
    "ribbon plant",
];

/// One box produced by the detector for a single image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    /// `[x1, y1, x2, y2]` in model input pixels.
    pub bbox: [f32; 4],
    pub class_index: usize,
    pub confidence: f32,
}

impl Detection {
    pub fn new(class_index: usize, confidence: f32, bbox: [f32; 4]) -> Self {
        Self {
            bbox,
            class_index,
            confidence,
        }
    }
}

/// Ordered class index -> label lookup matching the detector's output classes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassTable {
    labels: Arc<[String]>,
}

impl ClassTable {
    pub fn new<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            labels: labels.into_iter().map(Into::into).collect(),
        }
    }

    /// Classes of the shipped plant model, in training order.
    pub fn plants() -> Self {
        Self::new(PLANT_CLASSES)
    }

    pub fn from_file(path: &Path) -> io::Result<Self> {
        let file = File::open(path)?;
        Self::from_reader(io::BufReader::new(file))
    }

    pub fn from_reader<R: BufRead>(reader: R) -> io::Result<Self> {
        let mut labels = Vec::new();
        for line in reader.lines() {
            let line = line?;
            let label = line.trim();
            if !label.is_empty() {
                labels.push(label.to_string());
            }
        }

        if labels.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "class table has no labels",
            ));
        }

        Ok(Self::new(labels))
    }

    pub fn get(&self, class_index: usize) -> Option<&str> {
        self.labels.get(class_index).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }
}
