//! Durable activity storage on SQLite
//!
//! One connection guarded by a mutex serves the writer side. The database
//! runs in WAL mode so external readers (report tools, dashboards) never
//! block the writer for long. A write that still hits `SQLITE_BUSY` is
//! retried a few times with exponential backoff before the error surfaces.
//!
//! Each append runs in its own transaction. For events tied to a known
//! device, the device row is inserted first if missing, so the foreign
//! key always holds and no reader can see half an event.

use chrono::{DateTime, Utc};
use lanwatch_core::{
    ActivityEvent, BrowsingHistoryEvent, ConnectionEvent, Device, DeviceRef, DnsQueryEvent,
    DnsRecordType, Error, FormSubmissionEvent, MacAddr, ProtocolGuess, Result, SearchEngine,
    SearchQueryEvent,
};
use parking_lot::Mutex;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row, Transaction};
use std::net::IpAddr;
use std::path::Path;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS devices (
    mac_address TEXT PRIMARY KEY NOT NULL,
    ip_address  TEXT NOT NULL,
    hostname    TEXT,
    first_seen  TEXT NOT NULL,
    last_seen   TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS dns_queries (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    device_mac  TEXT REFERENCES devices (mac_address),
    source_ip   TEXT NOT NULL,
    query_name  TEXT NOT NULL,
    query_type  TEXT NOT NULL,
    timestamp   TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS connections (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    device_mac  TEXT REFERENCES devices (mac_address),
    source_ip   TEXT NOT NULL,
    dest_ip     TEXT NOT NULL,
    dest_port   INTEGER NOT NULL,
    protocol    TEXT NOT NULL,
    timestamp   TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS search_queries (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    device_mac    TEXT REFERENCES devices (mac_address),
    source_ip     TEXT NOT NULL,
    search_engine TEXT NOT NULL,
    query         TEXT NOT NULL,
    timestamp     TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS browsing_history (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    device_mac  TEXT REFERENCES devices (mac_address),
    source_ip   TEXT NOT NULL,
    method      TEXT NOT NULL,
    host        TEXT NOT NULL,
    path        TEXT NOT NULL,
    status_code INTEGER,
    timestamp   TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS form_submissions (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    device_mac  TEXT REFERENCES devices (mac_address),
    source_ip   TEXT NOT NULL,
    host        TEXT NOT NULL,
    path        TEXT NOT NULL,
    form_data   TEXT NOT NULL,
    timestamp   TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_dns_timestamp ON dns_queries (timestamp);
CREATE INDEX IF NOT EXISTS idx_dns_device ON dns_queries (device_mac);
CREATE INDEX IF NOT EXISTS idx_conn_timestamp ON connections (timestamp);
CREATE INDEX IF NOT EXISTS idx_conn_device ON connections (device_mac);
CREATE INDEX IF NOT EXISTS idx_search_timestamp ON search_queries (timestamp);
CREATE INDEX IF NOT EXISTS idx_browsing_timestamp ON browsing_history (timestamp);
CREATE INDEX IF NOT EXISTS idx_form_timestamp ON form_submissions (timestamp);
CREATE INDEX IF NOT EXISTS idx_devices_ip ON devices (ip_address);
";

/// Persisted tables
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Table {
    Devices,
    DnsQueries,
    Connections,
    SearchQueries,
    BrowsingHistory,
    FormSubmissions,
}

impl Table {
    pub const ALL: [Table; 6] = [
        Table::Devices,
        Table::DnsQueries,
        Table::Connections,
        Table::SearchQueries,
        Table::BrowsingHistory,
        Table::FormSubmissions,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Table::Devices => "devices",
            Table::DnsQueries => "dns_queries",
            Table::Connections => "connections",
            Table::SearchQueries => "search_queries",
            Table::BrowsingHistory => "browsing_history",
            Table::FormSubmissions => "form_submissions",
        }
    }
}

/// Backoff policy for busy/locked writes
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub initial_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            initial_delay: Duration::from_millis(10),
        }
    }
}

fn storage(e: rusqlite::Error) -> Error {
    Error::storage(e.to_string())
}

fn is_busy(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == ErrorCode::DatabaseBusy || err.code == ErrorCode::DatabaseLocked
    )
}

fn device_mac(device: DeviceRef) -> Option<String> {
    device.mac().map(|mac| mac.to_string())
}

/// Insert a placeholder device row so the event's foreign key holds
fn ensure_device(
    tx: &Transaction<'_>,
    device: DeviceRef,
    ip: IpAddr,
    seen: DateTime<Utc>,
) -> rusqlite::Result<()> {
    if let Some(mac) = device_mac(device) {
        tx.execute(
            "INSERT OR IGNORE INTO devices (mac_address, ip_address, first_seen, last_seen)
             VALUES (?1, ?2, ?3, ?3)",
            params![mac, ip.to_string(), seen],
        )?;
    }
    Ok(())
}

fn parse_column<T: std::str::FromStr>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let text: String = row.get(idx)?;
    text.parse().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn device_ref(row: &Row<'_>, idx: usize) -> rusqlite::Result<DeviceRef> {
    let mac: Option<String> = row.get(idx)?;
    Ok(mac
        .and_then(|m| m.parse::<MacAddr>().ok())
        .map(DeviceRef::Known)
        .unwrap_or(DeviceRef::Unknown))
}

fn device_row(row: &Row<'_>) -> rusqlite::Result<Device> {
    Ok(Device {
        mac: parse_column(row, 0)?,
        last_known_ip: parse_column(row, 1)?,
        hostname: row.get(2)?,
        first_seen: row.get(3)?,
        last_seen: row.get(4)?,
    })
}

/// SQLite-backed event store
pub struct ActivityStore {
    conn: Mutex<Connection>,
    retry: RetryPolicy,
}

impl ActivityStore {
    /// Open (creating if needed) the database at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)
            .map_err(|e| Error::storage(format!("open {}: {}", path.display(), e)))?;
        let store = Self::from_connection(conn)?;
        info!(path = %path.display(), "Opened activity store");
        Ok(store)
    }

    /// Private in-memory database
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory().map_err(storage)?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        // Contention is handled by RetryPolicy, not by SQLite's busy handler
        conn.busy_timeout(Duration::ZERO).map_err(storage)?;
        let mode: String = conn
            .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))
            .map_err(storage)?;
        debug!(journal_mode = %mode, "Configured journal");
        conn.pragma_update(None, "foreign_keys", "ON").map_err(storage)?;
        conn.pragma_update(None, "synchronous", "NORMAL").map_err(storage)?;
        conn.execute_batch(SCHEMA).map_err(storage)?;

        Ok(Self {
            conn: Mutex::new(conn),
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Run `op` in a transaction, retrying on busy/locked
    fn write<T>(&self, mut op: impl FnMut(&Transaction<'_>) -> rusqlite::Result<T>) -> Result<T> {
        let mut delay = self.retry.initial_delay;
        let mut attempt = 1;

        loop {
            let result = {
                let mut conn = self.conn.lock();
                conn.transaction().and_then(|tx| {
                    let out = op(&tx)?;
                    tx.commit()?;
                    Ok(out)
                })
            };

            match result {
                Ok(out) => return Ok(out),
                Err(e) if is_busy(&e) && attempt < self.retry.attempts => {
                    debug!(attempt, delay_ms = delay.as_millis() as u64, "Database busy, retrying");
                    thread::sleep(delay);
                    delay *= 2;
                    attempt += 1;
                }
                Err(e) => {
                    if is_busy(&e) {
                        warn!(attempts = attempt, "Database still busy, giving up on write");
                    }
                    return Err(storage(e));
                }
            }
        }
    }

    /// Insert or refresh a device row.
    ///
    /// A NULL hostname never overwrites a stored one, and `first_seen`
    /// only ever moves earlier.
    pub fn upsert_device(&self, device: &Device) -> Result<()> {
        self.write(|tx| {
            tx.execute(
                "INSERT INTO devices (mac_address, ip_address, hostname, first_seen, last_seen)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(mac_address) DO UPDATE SET
                    ip_address = excluded.ip_address,
                    hostname   = COALESCE(excluded.hostname, devices.hostname),
                    first_seen = MIN(devices.first_seen, excluded.first_seen),
                    last_seen  = MAX(devices.last_seen, excluded.last_seen)",
                params![
                    device.mac.to_string(),
                    device.last_known_ip.to_string(),
                    device.hostname,
                    device.first_seen,
                    device.last_seen,
                ],
            )
        })?;
        Ok(())
    }

    /// Set (or clear) the operator-assigned name; false if the device is unknown
    pub fn set_hostname(&self, mac: &MacAddr, hostname: Option<&str>) -> Result<bool> {
        let changed = self.write(|tx| {
            tx.execute(
                "UPDATE devices SET hostname = ?2 WHERE mac_address = ?1",
                params![mac.to_string(), hostname],
            )
        })?;
        Ok(changed > 0)
    }

    /// Persist one event atomically, returning its row id
    pub fn append(&self, event: &ActivityEvent) -> Result<i64> {
        self.write(|tx| {
            match event {
                ActivityEvent::Dns(e) => {
                    ensure_device(tx, e.device, e.source_ip, e.timestamp)?;
                    tx.execute(
                        "INSERT INTO dns_queries (device_mac, source_ip, query_name, query_type, timestamp)
                         VALUES (?1, ?2, ?3, ?4, ?5)",
                        params![
                            device_mac(e.device),
                            e.source_ip.to_string(),
                            e.queried_name,
                            e.record_type.as_str(),
                            e.timestamp,
                        ],
                    )?;
                }
                ActivityEvent::Connection(e) => {
                    ensure_device(tx, e.device, e.source_ip, e.timestamp)?;
                    tx.execute(
                        "INSERT INTO connections (device_mac, source_ip, dest_ip, dest_port, protocol, timestamp)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                        params![
                            device_mac(e.device),
                            e.source_ip.to_string(),
                            e.destination_ip.to_string(),
                            e.destination_port,
                            e.protocol_guess.as_str(),
                            e.timestamp,
                        ],
                    )?;
                }
                ActivityEvent::Search(e) => {
                    ensure_device(tx, e.device, e.source_ip, e.timestamp)?;
                    tx.execute(
                        "INSERT INTO search_queries (device_mac, source_ip, search_engine, query, timestamp)
                         VALUES (?1, ?2, ?3, ?4, ?5)",
                        params![
                            device_mac(e.device),
                            e.source_ip.to_string(),
                            e.search_engine.as_str(),
                            e.query_text,
                            e.timestamp,
                        ],
                    )?;
                }
                ActivityEvent::Browsing(e) => {
                    ensure_device(tx, e.device, e.source_ip, e.timestamp)?;
                    tx.execute(
                        "INSERT INTO browsing_history (device_mac, source_ip, method, host, path, status_code, timestamp)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                        params![
                            device_mac(e.device),
                            e.source_ip.to_string(),
                            e.method,
                            e.host,
                            e.path,
                            e.status_code,
                            e.timestamp,
                        ],
                    )?;
                }
                ActivityEvent::Form(e) => {
                    ensure_device(tx, e.device, e.source_ip, e.timestamp)?;
                    let fields = serde_json::to_string(&e.fields)
                        .map_err(|err| rusqlite::Error::ToSqlConversionFailure(Box::new(err)))?;
                    tx.execute(
                        "INSERT INTO form_submissions (device_mac, source_ip, host, path, form_data, timestamp)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                        params![
                            device_mac(e.device),
                            e.source_ip.to_string(),
                            e.host,
                            e.path,
                            fields,
                            e.timestamp,
                        ],
                    )?;
                }
            }
            Ok(tx.last_insert_rowid())
        })
    }

    pub fn devices(&self) -> Result<Vec<Device>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT mac_address, ip_address, hostname, first_seen, last_seen
                 FROM devices ORDER BY last_seen DESC",
            )
            .map_err(storage)?;
        let rows = stmt.query_map([], device_row).map_err(storage)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(storage)
    }

    pub fn device(&self, mac: &MacAddr) -> Result<Option<Device>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT mac_address, ip_address, hostname, first_seen, last_seen
             FROM devices WHERE mac_address = ?1",
            [mac.to_string()],
            device_row,
        )
        .optional()
        .map_err(storage)
    }

    /// Most recently seen stored device using `ip`
    pub fn device_by_ip(&self, ip: IpAddr) -> Result<Option<Device>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT mac_address, ip_address, hostname, first_seen, last_seen
             FROM devices WHERE ip_address = ?1 ORDER BY last_seen DESC LIMIT 1",
            [ip.to_string()],
            device_row,
        )
        .optional()
        .map_err(storage)
    }

    pub fn recent_dns_queries(&self, limit: usize) -> Result<Vec<DnsQueryEvent>> {
        self.query(
            "SELECT device_mac, source_ip, query_name, query_type, timestamp
             FROM dns_queries ORDER BY id DESC LIMIT ?1",
            limit,
            |row| {
                Ok(DnsQueryEvent {
                    device: device_ref(row, 0)?,
                    source_ip: parse_column(row, 1)?,
                    queried_name: row.get(2)?,
                    record_type: DnsRecordType::from_label(&row.get::<_, String>(3)?),
                    timestamp: row.get(4)?,
                })
            },
        )
    }

    pub fn recent_connections(&self, limit: usize) -> Result<Vec<ConnectionEvent>> {
        self.query(
            "SELECT device_mac, source_ip, dest_ip, dest_port, protocol, timestamp
             FROM connections ORDER BY id DESC LIMIT ?1",
            limit,
            |row| {
                let protocol: String = row.get(4)?;
                Ok(ConnectionEvent {
                    device: device_ref(row, 0)?,
                    source_ip: parse_column(row, 1)?,
                    destination_ip: parse_column(row, 2)?,
                    destination_port: row.get(3)?,
                    protocol_guess: ProtocolGuess::from_label(&protocol)
                        .unwrap_or(ProtocolGuess::Http),
                    timestamp: row.get(5)?,
                })
            },
        )
    }

    pub fn recent_searches(&self, limit: usize) -> Result<Vec<SearchQueryEvent>> {
        self.query(
            "SELECT device_mac, source_ip, search_engine, query, timestamp
             FROM search_queries ORDER BY id DESC LIMIT ?1",
            limit,
            |row| {
                Ok(SearchQueryEvent {
                    device: device_ref(row, 0)?,
                    source_ip: parse_column(row, 1)?,
                    search_engine: SearchEngine::from_label(&row.get::<_, String>(2)?),
                    query_text: row.get(3)?,
                    timestamp: row.get(4)?,
                })
            },
        )
    }

    pub fn recent_browsing(&self, limit: usize) -> Result<Vec<BrowsingHistoryEvent>> {
        self.query(
            "SELECT device_mac, source_ip, method, host, path, status_code, timestamp
             FROM browsing_history ORDER BY id DESC LIMIT ?1",
            limit,
            |row| {
                Ok(BrowsingHistoryEvent {
                    device: device_ref(row, 0)?,
                    source_ip: parse_column(row, 1)?,
                    method: row.get(2)?,
                    host: row.get(3)?,
                    path: row.get(4)?,
                    status_code: row.get(5)?,
                    timestamp: row.get(6)?,
                })
            },
        )
    }

    pub fn recent_form_submissions(&self, limit: usize) -> Result<Vec<FormSubmissionEvent>> {
        self.query(
            "SELECT device_mac, source_ip, host, path, form_data, timestamp
             FROM form_submissions ORDER BY id DESC LIMIT ?1",
            limit,
            |row| {
                let data: String = row.get(4)?;
                let fields = serde_json::from_str(&data).map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(
                        4,
                        rusqlite::types::Type::Text,
                        Box::new(e),
                    )
                })?;
                Ok(FormSubmissionEvent {
                    device: device_ref(row, 0)?,
                    source_ip: parse_column(row, 1)?,
                    host: row.get(2)?,
                    path: row.get(3)?,
                    fields,
                    timestamp: row.get(5)?,
                })
            },
        )
    }

    fn query<T>(
        &self,
        sql: &str,
        limit: usize,
        map: impl FnMut(&Row<'_>) -> rusqlite::Result<T>,
    ) -> Result<Vec<T>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(sql).map_err(storage)?;
        let rows = stmt
            .query_map([limit as i64], map)
            .map_err(storage)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(storage)
    }

    /// Row count of one table
    pub fn count(&self, table: Table) -> Result<u64> {
        let conn = self.conn.lock();
        let sql = format!("SELECT COUNT(*) FROM {}", table.name());
        let n: i64 = conn.query_row(&sql, [], |row| row.get(0)).map_err(storage)?;
        Ok(n as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use tempfile::tempdir;

    fn mac() -> MacAddr {
        "aa:bb:cc:dd:ee:ff".parse().unwrap()
    }

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    fn connection(device: DeviceRef) -> ActivityEvent {
        ActivityEvent::Connection(ConnectionEvent {
            device,
            source_ip: ip("192.168.1.10"),
            destination_ip: ip("93.184.216.34"),
            destination_port: 443,
            protocol_guess: ProtocolGuess::Https,
            timestamp: Utc::now(),
        })
    }

    #[test]
    fn test_schema_on_disk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("activity.db");
        {
            let store = ActivityStore::open(&path).unwrap();
            store.append(&connection(DeviceRef::Known(mac()))).unwrap();
        }

        let store = ActivityStore::open(&path).unwrap();
        for table in Table::ALL {
            store.count(table).unwrap();
        }
        assert_eq!(store.count(Table::Connections).unwrap(), 1);
        assert_eq!(store.count(Table::Devices).unwrap(), 1);
    }

    #[test]
    fn test_duplicate_events_are_kept() {
        let store = ActivityStore::open_in_memory().unwrap();
        let event = connection(DeviceRef::Known(mac()));
        let a = store.append(&event).unwrap();
        let b = store.append(&event).unwrap();
        assert_ne!(a, b);
        assert_eq!(store.count(Table::Connections).unwrap(), 2);
    }

    #[test]
    fn test_unknown_device_has_null_reference() {
        let store = ActivityStore::open_in_memory().unwrap();
        store.append(&connection(DeviceRef::Unknown)).unwrap();

        assert_eq!(store.count(Table::Devices).unwrap(), 0);
        let rows = store.recent_connections(10).unwrap();
        assert_eq!(rows[0].device, DeviceRef::Unknown);
    }

    #[test]
    fn test_upsert_device_keeps_hostname_and_first_seen() {
        let store = ActivityStore::open_in_memory().unwrap();
        let t0 = Utc::now() - ChronoDuration::hours(1);
        let mut device = Device::new(mac(), ip("192.168.1.10"), t0);
        store.upsert_device(&device).unwrap();
        assert!(store.set_hostname(&mac(), Some("kitchen-tablet")).unwrap());

        device.first_seen = Utc::now();
        device.last_seen = Utc::now();
        device.last_known_ip = ip("192.168.1.11");
        store.upsert_device(&device).unwrap();

        let stored = store.device(&mac()).unwrap().unwrap();
        assert_eq!(stored.hostname.as_deref(), Some("kitchen-tablet"));
        assert_eq!(stored.first_seen, t0);
        assert_eq!(stored.last_known_ip, ip("192.168.1.11"));

        assert_eq!(store.device_by_ip(ip("192.168.1.11")).unwrap().unwrap().mac, mac());
        assert!(store.device_by_ip(ip("192.168.1.10")).unwrap().is_none());
        assert!(!store.set_hostname(&MacAddr::new([2, 0, 0, 0, 0, 9]), Some("x")).unwrap());
    }

    #[test]
    fn test_event_read_back() {
        let store = ActivityStore::open_in_memory().unwrap();
        let device = DeviceRef::Known(mac());
        let now = Utc::now();

        store
            .append(&ActivityEvent::Dns(DnsQueryEvent {
                device,
                source_ip: ip("192.168.1.10"),
                queried_name: "youtube.com".into(),
                record_type: DnsRecordType::A,
                timestamp: now,
            }))
            .unwrap();
        store
            .append(&ActivityEvent::Search(SearchQueryEvent {
                device,
                source_ip: ip("192.168.1.10"),
                search_engine: SearchEngine::Google,
                query_text: "rust ownership".into(),
                timestamp: now,
            }))
            .unwrap();
        store
            .append(&ActivityEvent::Browsing(BrowsingHistoryEvent {
                device,
                source_ip: ip("192.168.1.10"),
                method: "GET".into(),
                host: "example.com".into(),
                path: "/a?b=c".into(),
                status_code: Some(200),
                timestamp: now,
            }))
            .unwrap();
        store
            .append(&ActivityEvent::Form(FormSubmissionEvent {
                device,
                source_ip: ip("192.168.1.10"),
                host: "example.com".into(),
                path: "/login".into(),
                fields: vec![("user".into(), "bob".into()), ("password".into(), "[REDACTED]".into())],
                timestamp: now,
            }))
            .unwrap();

        let dns = store.recent_dns_queries(5).unwrap();
        assert_eq!(dns[0].queried_name, "youtube.com");
        assert_eq!(dns[0].device, device);
        assert_eq!(dns[0].timestamp, now);

        assert_eq!(store.recent_searches(5).unwrap()[0].search_engine, SearchEngine::Google);
        assert_eq!(store.recent_browsing(5).unwrap()[0].status_code, Some(200));
        assert_eq!(store.recent_form_submissions(5).unwrap()[0].fields[1].1, "[REDACTED]");
        assert_eq!(store.devices().unwrap().len(), 1);
    }

    #[test]
    fn test_busy_writer_is_retried_then_reported() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("busy.db");
        let store = ActivityStore::open(&path).unwrap().with_retry(RetryPolicy {
            attempts: 3,
            initial_delay: Duration::from_millis(1),
        });

        let blocker = Connection::open(&path).unwrap();
        blocker.execute_batch("BEGIN IMMEDIATE").unwrap();

        let result = store.append(&connection(DeviceRef::Unknown));
        assert!(matches!(result, Err(Error::Storage(_))));

        blocker.execute_batch("COMMIT").unwrap();
        store.append(&connection(DeviceRef::Unknown)).unwrap();
        assert_eq!(store.count(Table::Connections).unwrap(), 1);
    }
}
