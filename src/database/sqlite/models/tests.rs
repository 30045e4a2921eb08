use chrono::Utc;

use super::*;

fn sample_row() -> VersionRow {
    VersionRow {
        id: 7,
        recipe_id: 2,
        version_number: 3,
        title: "Sourdough".to_string(),
        content: "# Sourdough\n\nFlour, water, salt.".to_string(),
        content_hash: "abc".to_string(),
        is_current: true,
        ai_summary: None,
        created_at: Utc::now().naive_utc(),
        deleted_at: None,
    }
}

#[test]
fn queue_status_display() {
    assert_eq!(QueueStatus::Pending.to_string(), "Pending");
    assert_eq!(QueueStatus::Processing.to_string(), "Processing");
    assert_eq!(QueueStatus::Completed.to_string(), "Completed");
    assert_eq!(QueueStatus::Failed.to_string(), "Failed");
}

#[test]
fn queue_status_activity() {
    assert!(QueueStatus::Pending.is_active());
    assert!(QueueStatus::Processing.is_active());
    assert!(!QueueStatus::Completed.is_active());
    assert!(!QueueStatus::Failed.is_active());
    assert_eq!(QueueStatus::Processing.as_str(), "processing");
}

#[test]
fn version_from_row_keeps_fields() {
    let version = RecipeVersion::from_row(
        sample_row(),
        vec!["bread".to_string()],
        vec!["Bakery".to_string()],
    );

    assert_eq!(version.id, 7);
    assert_eq!(version.version_number, 3);
    assert_eq!(version.version_label(), "v3");
    assert_eq!(version.tags, vec!["bread".to_string()]);
    assert!(version.in_project("bakery"));
    assert!(!version.in_project("pastry"));
}

#[test]
fn deleted_queue_item_is_not_active() {
    let item = QueueItem {
        id: 1,
        title: "Sourdough".to_string(),
        short_id: "sourdough".to_string(),
        version_id: 7,
        status: QueueStatus::Pending,
        error: None,
        created_at: Utc::now().naive_utc(),
        started_at: None,
        completed_at: None,
        deleted_at: Some(Utc::now().naive_utc()),
    };

    assert!(!item.is_active());
}
