use crate::config::{LabelsConfig, Validatable};
use std::{
    fs::File,
    io::{self, BufRead},
    path::Path,
};

pub trait State: Send + Sync + 'static {
    fn new(labels_cfg: &LabelsConfig) -> Result<Self, String>
    where
        Self: Sized;
    fn get_labels(&self) -> &[String];

    fn label_for(&self, class_id: i32) -> Option<&str> {
        usize::try_from(class_id)
            .ok()
            .and_then(|id| self.get_labels().get(id))
            .map(String::as_str)
    }
}

#[derive(Debug)]
pub struct ServiceState {
    class_labels: Vec<String>,
}

impl State for ServiceState {
    fn new(labels_cfg: &LabelsConfig) -> Result<ServiceState, String> {
        match load_class_labels(&labels_cfg.get_path()) {
            Ok(labels) => {
                tracing::info!("Loaded {} class labels", labels.len());
                Ok(ServiceState {
                    class_labels: labels,
                })
            }
            Err(e) => Err(format!("Failed to load labels: {}", e)),
        }
    }

    fn get_labels(&self) -> &[String] {
        &self.class_labels
    }
}

/// Reads one class label per line, in class id order. Anything after a comma
/// on a line (e.g. a display color) is ignored; blank lines are skipped.
pub fn load_class_labels(filepath: &Path) -> io::Result<Vec<String>> {
    let file = File::open(filepath)?;
    let reader = io::BufReader::new(file);
    let mut labels = Vec::new();

    for line_result in reader.lines() {
        let line = line_result?;
        let label = line.split(',').next().unwrap_or_default().trim();
        if label.is_empty() {
            continue;
        }
        labels.push(label.to_string());
    }

    if labels.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("no labels found in {:?}", filepath),
        ));
    }

    Ok(labels)
}
