use anyhow::Result;
use nbcache::{CacheRecord, NbRef, NotebookCache, ProjectRecord};
use serde::Serialize;
use time::macros::format_description;
use time::OffsetDateTime;

pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Render epoch milliseconds as `YYYY-MM-DD HH:MM` (UTC).
pub fn format_millis(millis: i64) -> String {
    let format = format_description!("[year]-[month]-[day] [hour]:[minute]");
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(millis) * 1_000_000)
        .ok()
        .and_then(|dt| dt.format(&format).ok())
        .unwrap_or_else(|| millis.to_string())
}

pub fn print_cache_record_line(record: &CacheRecord) {
    println!(
        "{:<4} {:<19} {:<19} {}",
        record.pk,
        format_millis(record.created),
        format_millis(record.accessed),
        record.uri
    );
}

pub fn print_cache_list_header() {
    println!("{:<4} {:<19} {:<19} {}", "ID", "Created", "Accessed", "URI");
}

/// One status line per project notebook, mirroring the record's state:
/// cached, excepted (has a traceback), unreadable, or not yet executed.
pub fn project_status(cache: &NotebookCache, record: &ProjectRecord) -> String {
    match cache.cached_for_notebook(NbRef::Pk(record.pk)) {
        Ok(Some(cached)) => format!("cached [{}]", cached.pk),
        Ok(None) if record.traceback.is_some() => "excepted".to_string(),
        Ok(None) => "-".to_string(),
        Err(_) => "unreadable".to_string(),
    }
}

pub fn print_project_record_line(cache: &NotebookCache, record: &ProjectRecord) {
    println!(
        "{:<4} {:<19} {:<12} {}",
        record.pk,
        format_millis(record.created),
        project_status(cache, record),
        record.uri
    );
}

pub fn print_project_list_header() {
    println!("{:<4} {:<19} {:<12} {}", "ID", "Added", "Status", "URI");
}
