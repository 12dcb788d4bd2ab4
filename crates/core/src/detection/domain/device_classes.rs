use std::collections::HashSet;

use crate::detection::domain::detections::DeviceDetection;

/// Detector label spellings folded onto one monitored device name.
const ALIASES: &[(&str, &str)] = &[
    ("tv", "monitor/tv"),
    ("monitor", "monitor/tv"),
    ("tvmonitor", "monitor/tv"),
    ("cellphone", "cell phone"),
    ("mobile phone", "cell phone"),
    ("phone", "cell phone"),
    ("notebook", "laptop"),
];

/// Maps raw detector class labels to the monitored device names.
pub struct DeviceClassMap {
    monitored: Vec<String>,
}

impl DeviceClassMap {
    pub fn new(monitored: &[String]) -> Self {
        Self {
            monitored: monitored.iter().map(|l| l.trim().to_lowercase()).collect(),
        }
    }

    /// Monitored name for `raw`, `None` for classes nobody watches.
    pub fn canonical(&self, raw: &str) -> Option<&str> {
        let label = raw.trim().to_lowercase();
        let label = ALIASES
            .iter()
            .find(|(alias, _)| *alias == label)
            .map(|(_, name)| *name)
            .unwrap_or(label.as_str());
        self.monitored
            .iter()
            .find(|m| m.as_str() == label)
            .map(String::as_str)
    }

    /// Monitored devices seen above `floor` in this frame.
    pub fn present(&self, devices: &[DeviceDetection], floor: f64) -> HashSet<String> {
        devices
            .iter()
            .filter(|d| d.confidence > floor)
            .filter_map(|d| self.canonical(&d.label))
            .map(str::to_string)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::bbox::BoundingBox;
    use crate::shared::constants::MONITORED_DEVICES;
    use rstest::rstest;

    fn map() -> DeviceClassMap {
        let labels: Vec<String> = MONITORED_DEVICES.iter().map(|s| s.to_string()).collect();
        DeviceClassMap::new(&labels)
    }

    fn device(label: &str, confidence: f64) -> DeviceDetection {
        DeviceDetection {
            label: label.to_string(),
            confidence,
            bbox: BoundingBox::new(0.0, 0.0, 10.0, 10.0),
        }
    }

    #[rstest]
    #[case("cell phone", Some("cell phone"))]
    #[case("Cell Phone", Some("cell phone"))]
    #[case("laptop", Some("laptop"))]
    #[case("tv", Some("monitor/tv"))]
    #[case("monitor", Some("monitor/tv"))]
    #[case("book", None)]
    #[case("person", None)]
    fn test_canonical_labels(#[case] raw: &str, #[case] expected: Option<&str>) {
        assert_eq!(map().canonical(raw), expected);
    }

    #[test]
    fn test_present_applies_floor_and_dedups() {
        let present = map().present(
            &[
                device("cell phone", 0.9),
                device("phone", 0.5),
                device("laptop", 0.3),
                device("cup", 0.9),
            ],
            0.3,
        );
        assert_eq!(present, HashSet::from(["cell phone".to_string()]));
    }
}
