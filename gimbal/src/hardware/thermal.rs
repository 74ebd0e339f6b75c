use std::{io, path::Path};

/// Reads a sysfs thermal zone, which reports millidegrees Celsius.
pub async fn read_celsius(path: &Path) -> io::Result<f32> {
    let raw = tokio::fs::read_to_string(path).await?;
    parse_millidegrees(&raw)
}

fn parse_millidegrees(raw: &str) -> io::Result<f32> {
    raw.trim()
        .parse::<i64>()
        .map(|milli| milli as f32 / 1000.0)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}
