//! Client side of the `tallyd` D-Bus interface.

// `#[zbus::proxy]` generates `AttendanceProxy` (async) and a blocking variant.
#[zbus::proxy(
    interface = "org.tally.Attendance1",
    default_service = "org.tally.Attendance1",
    default_path = "/org/tally/Attendance1"
)]
pub trait Attendance {
    async fn record_image(&self, path: &str) -> zbus::Result<String>;
    async fn todays_records(&self) -> zbus::Result<String>;
    async fn reload_known_faces(&self) -> zbus::Result<u32>;
    async fn status(&self) -> zbus::Result<String>;
}

/// Connect to the daemon on the session bus.
pub async fn connect() -> anyhow::Result<AttendanceProxy<'static>> {
    let conn = zbus::Connection::session().await?;
    Ok(AttendanceProxy::new(&conn).await?)
}
