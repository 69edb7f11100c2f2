//! Client-side statistics over a fetched image set.

use std::collections::BTreeMap;

use crate::models::ImageRecord;

/// How many items the recent-activity slice keeps.
pub const RECENT_ACTIVITY_LIMIT: usize = 10;

/// Computed rollup for one filter window. Replaced wholesale on every
/// filter change, never mutated incrementally.
#[derive(Debug, Clone, Default)]
pub struct AggregateSnapshot {
    /// Number of images in the fetched set.
    pub total_images: usize,
    /// Sum of detection counts across all images, labeled or not.
    pub total_detections: usize,
    /// Detection count per non-empty label. Unlabeled detections count
    /// toward `total_detections` but are excluded here.
    pub detections_by_label: BTreeMap<String, usize>,
    /// The first items of the fetched sequence, in server order. The
    /// server returns newest first; no re-sort happens here.
    pub recent_activity: Vec<ImageRecord>,
}

impl AggregateSnapshot {
    /// Mean detections per image, zero for an empty set.
    pub fn average_detections(&self) -> f64 {
        if self.total_images == 0 {
            0.0
        } else {
            self.total_detections as f64 / self.total_images as f64
        }
    }
}

/// Compute the rollup for a fetched item sequence.
pub fn summarize(items: &[ImageRecord]) -> AggregateSnapshot {
    let mut total_detections = 0;
    let mut detections_by_label: BTreeMap<String, usize> = BTreeMap::new();

    for image in items {
        total_detections += image.detections.len();
        for detection in &image.detections {
            if !detection.label.is_empty() {
                *detections_by_label
                    .entry(detection.label.clone())
                    .or_insert(0) += 1;
            }
        }
    }

    AggregateSnapshot {
        total_images: items.len(),
        total_detections,
        detections_by_label,
        recent_activity: items
            .iter()
            .take(RECENT_ACTIVITY_LIMIT)
            .cloned()
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(id: &str, labels: &[&str]) -> ImageRecord {
        let detections: Vec<serde_json::Value> = labels
            .iter()
            .map(|label| serde_json::json!({"label": label, "confidence": 0.9}))
            .collect();
        serde_json::from_value(serde_json::json!({
            "_id": id,
            "originalName": format!("{id}.jpg"),
            "detections": detections,
        }))
        .unwrap()
    }

    #[test]
    fn test_unlabeled_detections_count_total_only() {
        let items = vec![image("a", &["helmet", ""]), image("b", &[])];
        let snapshot = summarize(&items);

        assert_eq!(snapshot.total_images, 2);
        assert_eq!(snapshot.total_detections, 2);
        assert_eq!(snapshot.detections_by_label.len(), 1);
        assert_eq!(snapshot.detections_by_label.get("helmet"), Some(&1));
    }

    #[test]
    fn test_histogram_accumulates_per_label() {
        let items = vec![
            image("a", &["helmet", "vest"]),
            image("b", &["helmet"]),
            image("c", &["vest", "vest"]),
        ];
        let snapshot = summarize(&items);

        assert_eq!(snapshot.total_detections, 5);
        assert_eq!(snapshot.detections_by_label.get("helmet"), Some(&2));
        assert_eq!(snapshot.detections_by_label.get("vest"), Some(&3));
        // Histogram totals equal the labeled detection count.
        let labeled: usize = snapshot.detections_by_label.values().sum();
        assert_eq!(labeled, 5);
    }

    #[test]
    fn test_recent_activity_is_bounded_prefix() {
        let items: Vec<ImageRecord> = (0..15)
            .map(|i| image(&format!("img{i}"), &["helmet"]))
            .collect();
        let snapshot = summarize(&items);

        assert_eq!(snapshot.recent_activity.len(), RECENT_ACTIVITY_LIMIT);
        assert_eq!(snapshot.recent_activity[0].id, "img0");
        assert_eq!(snapshot.recent_activity[9].id, "img9");
    }

    #[test]
    fn test_small_set_recent_activity_never_exceeds_set() {
        let items = vec![image("only", &[])];
        let snapshot = summarize(&items);
        assert_eq!(snapshot.recent_activity.len(), 1);
    }

    #[test]
    fn test_empty_set() {
        let snapshot = summarize(&[]);
        assert_eq!(snapshot.total_images, 0);
        assert_eq!(snapshot.total_detections, 0);
        assert!(snapshot.detections_by_label.is_empty());
        assert!(snapshot.recent_activity.is_empty());
        assert_eq!(snapshot.average_detections(), 0.0);
    }

    #[test]
    fn test_average_detections() {
        let items = vec![image("a", &["helmet", "vest", "vest"]), image("b", &[])];
        let snapshot = summarize(&items);
        assert!((snapshot.average_detections() - 1.5).abs() < 1e-9);
    }
}
