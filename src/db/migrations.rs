use anyhow::{bail, Context, Result};
use log::info;
use rusqlite::Connection;

/// Schema steps in order; step `i` takes `user_version` from `i` to `i + 1`.
const STEPS: &[(&str, &str)] = &[
    ("message capture", include_str!("schemas/schema_v1.sql")),
    ("calibration results", include_str!("schemas/schema_v2.sql")),
];

fn schema_version() -> i32 {
    STEPS.len() as i32
}

/// Bring the message store up to the newest schema.
///
/// Pending steps run in a single transaction, so a store is either fully
/// upgraded or left at its previous version.
pub fn run_migrations(conn: &mut Connection) -> Result<()> {
    let target = schema_version();
    let found: i32 = conn
        .pragma_query_value(None, "user_version", |row| row.get(0))
        .context("cannot read store schema version")?;

    if found > target {
        bail!("message store schema v{found} was written by a newer build (this one knows v{target})");
    }
    let Ok(applied) = usize::try_from(found) else {
        bail!("message store reports a negative schema version ({found})");
    };
    if applied == STEPS.len() {
        return Ok(());
    }

    let tx = conn.transaction().context("cannot start schema upgrade")?;
    for (index, (name, sql)) in STEPS.iter().enumerate().skip(applied) {
        tx.execute_batch(sql)
            .with_context(|| format!("schema step v{} ({name}) failed", index + 1))?;
    }
    tx.pragma_update(None, "user_version", target)
        .context("cannot record store schema version")?;
    tx.commit().context("cannot commit schema upgrade")?;

    info!("Message store schema upgraded from v{found} to v{target}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn version(conn: &Connection) -> i32 {
        conn.pragma_query_value(None, "user_version", |row| row.get(0))
            .unwrap()
    }

    fn table_count(conn: &Connection) -> i64 {
        conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master
             WHERE type = 'table' AND name IN ('mqtt_messages', 'calib_mean_results')",
            [],
            |row| row.get(0),
        )
        .unwrap()
    }

    #[test]
    fn migrations_are_idempotent() {
        let mut conn = Connection::open_in_memory().unwrap();
        run_migrations(&mut conn).unwrap();
        run_migrations(&mut conn).unwrap();

        assert_eq!(version(&conn), 2);
        assert_eq!(table_count(&conn), 2);
    }

    #[test]
    fn capture_only_store_gains_result_table_and_keeps_rows() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(STEPS[0].1).unwrap();
        conn.pragma_update(None, "user_version", 1).unwrap();
        conn.execute(
            "INSERT INTO mqtt_messages (topic, payload, received_at) VALUES ('calibration/32B', '{}', 'now')",
            [],
        )
        .unwrap();

        run_migrations(&mut conn).unwrap();

        assert_eq!(version(&conn), schema_version());
        assert_eq!(table_count(&conn), 2);
        let kept: i64 = conn
            .query_row("SELECT COUNT(*) FROM mqtt_messages", [], |row| row.get(0))
            .unwrap();
        assert_eq!(kept, 1);
    }

    #[test]
    fn refuses_newer_schema() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.pragma_update(None, "user_version", schema_version() + 1)
            .unwrap();
        assert!(run_migrations(&mut conn).is_err());
        assert_eq!(table_count(&conn), 0);
    }

    #[test]
    fn refuses_negative_schema_version() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.pragma_update(None, "user_version", -1).unwrap();
        assert!(run_migrations(&mut conn).is_err());
    }
}
