use anyhow::{Context, Result};
use rusqlite::{params, Connection, Row};

use crate::db::{
    connection::Database,
    helpers::{
        conversion_error, format_datetime, parse_datetime, parse_naive, to_i64, to_u64,
        NODE_TIME_FORMAT,
    },
    models::CalibrationResult,
};

use super::messages::mark_ids;

fn row_to_result(row: &Row) -> Result<CalibrationResult, rusqlite::Error> {
    let total_runs: i64 = row.get("total_runs")?;
    let first_sample_at: String = row.get("first_sample_at")?;
    let computed_at: String = row.get("computed_at")?;

    Ok(CalibrationResult {
        id: Some(row.get("id")?),
        center_id: row.get("cent")?,
        leaf_id: row.get("leaf")?,
        center_tx_gain: row.get("cent_tx_gain")?,
        leaf_rx_gain: row.get("leaf_rx_gain")?,
        fwd_amp_mean: row.get("amp_c_to_l_mean")?,
        fwd_amp_var: row.get("amp_c_to_l_var")?,
        rev_amp_mean: row.get("amp_l_to_c_mean")?,
        rev_amp_var: row.get("amp_l_to_c_var")?,
        ratio_of_means: row.get("ratio_amp_mean")?,
        amp_ratio_mean: row.get("amp_ratio_mean")?,
        amp_ratio_var: row.get("amp_ratio_var")?,
        sample_count: to_u64(total_runs, "total_runs").map_err(conversion_error)?,
        first_sample_at: parse_naive(&first_sample_at, "first_sample_at")
            .map_err(conversion_error)?,
        computed_at: parse_datetime(&computed_at, "computed_at").map_err(conversion_error)?,
    })
}

fn insert_result(conn: &Connection, record: &CalibrationResult) -> Result<i64> {
    conn.execute(
        "INSERT INTO calib_mean_results (
            cent, leaf, cent_tx_gain, leaf_rx_gain,
            amp_c_to_l_mean, amp_c_to_l_var, amp_l_to_c_mean, amp_l_to_c_var,
            ratio_amp_mean, amp_ratio_mean, amp_ratio_var,
            total_runs, first_sample_at, computed_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
        params![
            record.center_id,
            record.leaf_id,
            record.center_tx_gain,
            record.leaf_rx_gain,
            record.fwd_amp_mean,
            record.fwd_amp_var,
            record.rev_amp_mean,
            record.rev_amp_var,
            record.ratio_of_means,
            record.amp_ratio_mean,
            record.amp_ratio_var,
            to_i64(record.sample_count)?,
            record.first_sample_at.format(NODE_TIME_FORMAT).to_string(),
            format_datetime(&record.computed_at),
        ],
    )
    .with_context(|| {
        format!(
            "failed to insert calibration result for {}/{}",
            record.center_id, record.leaf_id
        )
    })?;
    Ok(conn.last_insert_rowid())
}

impl Database {
    pub async fn insert_calibration_result(&self, result: &CalibrationResult) -> Result<i64> {
        let record = result.clone();
        self.execute(move |conn| insert_result(conn, &record)).await
    }

    /// Persist one aggregation run atomically: every result row plus the
    /// processed flag of every message the run selected. Returns the results
    /// with their assigned ids.
    pub async fn commit_calibration_run(
        &self,
        results: Vec<CalibrationResult>,
        consumed_ids: Vec<i64>,
    ) -> Result<Vec<CalibrationResult>> {
        self.execute(move |conn| {
            let tx = conn
                .transaction()
                .context("failed to open calibration run transaction")?;

            let mut stored = Vec::with_capacity(results.len());
            for mut record in results {
                record.id = Some(insert_result(&tx, &record)?);
                stored.push(record);
            }
            mark_ids(&tx, &consumed_ids)?;

            tx.commit().context("failed to commit calibration run")?;
            Ok(stored)
        })
        .await
    }

    /// History for one pair, oldest first.
    pub async fn list_calibration_results(
        &self,
        center_id: &str,
        leaf_id: &str,
    ) -> Result<Vec<CalibrationResult>> {
        let center_id = center_id.to_string();
        let leaf_id = leaf_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, cent, leaf, cent_tx_gain, leaf_rx_gain,
                        amp_c_to_l_mean, amp_c_to_l_var, amp_l_to_c_mean, amp_l_to_c_var,
                        ratio_amp_mean, amp_ratio_mean, amp_ratio_var,
                        total_runs, first_sample_at, computed_at
                 FROM calib_mean_results
                 WHERE cent = ?1 AND leaf = ?2
                 ORDER BY id ASC",
            )?;

            let results = stmt
                .query_map(params![center_id, leaf_id], row_to_result)?
                .collect::<Result<Vec<_>, _>>()?;

            Ok(results)
        })
        .await
    }

    pub async fn count_calibration_results(&self) -> Result<u64> {
        self.execute(|conn| {
            let count: i64 =
                conn.query_row("SELECT COUNT(*) FROM calib_mean_results", [], |row| {
                    row.get(0)
                })?;
            Ok(count as u64)
        })
        .await
    }
}
