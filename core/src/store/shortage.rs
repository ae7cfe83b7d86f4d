use super::{
    now_stamp, DeliveryFileRow, DeliverySummary, InsertSummary, MismatchEntry, ShortageFileRow,
    ShortageRecord, ShortageStore, SymbolReconciliation, MAX_ROWS_PER_STATEMENT,
};
use crate::error::ReconResult;
use rusqlite::{params, params_from_iter, types::Value, Connection, Transaction};

const RECORD_COLUMNS: &str = "id, business_date, settlement_no, clnt_id, security_symbol, isin,
     short_quantity, qty_received_t1, total_quantity, created_date, updated_date";

impl ShortageStore {
    // ─────────────────────────────────────────────────────────────────
    // Shortage-file cohort
    // ─────────────────────────────────────────────────────────────────

    /// Insert the day's shortage-file rows, flushing every `batch_size` rows.
    ///
    /// Any earlier cohort for `business_date` is replaced in the same
    /// transaction, so re-running a day overwrites instead of duplicating.
    /// Duplicate keys within one file are inserted as distinct rows.
    /// A row-source error rolls back the whole cohort.
    pub fn insert_shortage_cohort<I>(
        &self,
        business_date: &str,
        rows: I,
        batch_size: usize,
    ) -> ReconResult<InsertSummary>
    where
        I: IntoIterator<Item = ReconResult<ShortageFileRow>>,
    {
        let batch_size = batch_size.clamp(1, MAX_ROWS_PER_STATEMENT);
        let tx = self.conn.unchecked_transaction()?;
        let now = now_stamp();

        let replaced = tx.execute(
            "DELETE FROM short_delivery WHERE business_date = ?1",
            params![business_date],
        )?;
        if replaced > 0 {
            log::info!("Replacing {replaced} short_delivery rows for {business_date}");
        }

        let mut summary = InsertSummary {
            replaced,
            ..Default::default()
        };
        let mut batch: Vec<ShortageFileRow> = Vec::with_capacity(batch_size);
        for row in rows {
            batch.push(row?);
            if batch.len() == batch_size {
                summary.inserted += flush_shortage_batch(&tx, business_date, &now, &batch)?;
                summary.batches += 1;
                batch.clear();
            }
        }
        if !batch.is_empty() {
            summary.inserted += flush_shortage_batch(&tx, business_date, &now, &batch)?;
            summary.batches += 1;
        }

        tx.commit()?;
        log::info!(
            "Inserted {} shortage rows for {business_date} in {} batches",
            summary.inserted,
            summary.batches
        );
        Ok(summary)
    }

    // ─────────────────────────────────────────────────────────────────
    // Delivery-file updates
    // ─────────────────────────────────────────────────────────────────

    /// Apply delivery-file receipts keyed by (security_symbol, settlement_no).
    ///
    /// Updates run row by row through one prepared statement inside a single
    /// transaction; the stream is never buffered. Every matching row is
    /// updated. Rows without both key fields or without a received quantity
    /// are skipped and counted, never retried.
    pub fn apply_delivery_updates<I>(
        &self,
        business_date: &str,
        rows: I,
    ) -> ReconResult<DeliverySummary>
    where
        I: IntoIterator<Item = ReconResult<DeliveryFileRow>>,
    {
        let tx = self.conn.unchecked_transaction()?;
        let now = now_stamp();
        let mut summary = DeliverySummary::default();

        {
            let mut stmt = tx.prepare(
                "UPDATE short_delivery
                 SET qty_received_t1 = ?1,
                     isin = COALESCE(?2, isin),
                     clnt_id = COALESCE(?3, clnt_id),
                     updated_date = ?4
                 WHERE business_date = ?5 AND security_symbol = ?6 AND settlement_no = ?7",
            )?;

            for row in rows {
                let row = row?;
                summary.rows_seen += 1;
                let (Some(symbol), Some(settlement), Some(qty)) = (
                    row.security_symbol.as_deref(),
                    row.settlement_no.as_deref(),
                    row.quantity_received,
                ) else {
                    summary.skipped += 1;
                    continue;
                };

                let changed = stmt.execute(params![
                    qty,
                    row.isin,
                    row.client_id,
                    now,
                    business_date,
                    symbol,
                    settlement,
                ])?;
                if changed == 0 {
                    summary.unmatched += 1;
                }
                summary.rows_updated += changed;
            }
        }

        tx.commit()?;
        if summary.skipped > 0 {
            log::warn!(
                "Skipped {} delivery rows without settlement, symbol or quantity",
                summary.skipped
            );
        }
        log::info!(
            "Delivery updates for {business_date}: {} rows updated, {} unmatched",
            summary.rows_updated,
            summary.unmatched
        );
        Ok(summary)
    }

    // ─────────────────────────────────────────────────────────────────
    // Ledger aggregation
    // ─────────────────────────────────────────────────────────────────

    /// Overwrite `total_quantity` from the ledger aggregate grouped by
    /// (settlement, upper-cased ISIN, de-tagged party code).
    ///
    /// An overwrite, never an increment: re-running on unchanged ledger data
    /// leaves totals as they were. Rows whose total already matches are not
    /// written, so their `updated_date` is kept.
    pub fn recompute_total_quantity(&self, client_tag: char) -> ReconResult<usize> {
        let tx = self.conn.unchecked_transaction()?;
        let updated = tx.execute(
            "UPDATE short_delivery
             SET total_quantity = agg.total_trn_qty,
                 updated_date = ?2
             FROM (
                 SELECT settlement_no,
                        UPPER(isin) AS isin,
                        CASE WHEN substr(TRIM(party_cd), 1, 1) = ?1
                             THEN substr(TRIM(party_cd), 2)
                             ELSE TRIM(party_cd)
                        END AS clnt_id,
                        SUM(trn_qty) AS total_trn_qty
                 FROM trxn_table_class
                 GROUP BY 1, 2, 3
             ) AS agg
             WHERE short_delivery.settlement_no = agg.settlement_no
               AND UPPER(short_delivery.isin) = agg.isin
               AND short_delivery.clnt_id = agg.clnt_id
               AND short_delivery.total_quantity IS NOT agg.total_trn_qty",
            params![client_tag.to_string(), now_stamp()],
        )?;
        tx.commit()?;
        log::info!("Updated total_quantity for {updated} rows in short_delivery");
        Ok(updated)
    }

    // ─────────────────────────────────────────────────────────────────
    // Mismatch correction
    // ─────────────────────────────────────────────────────────────────

    /// Compare received vs ledger totals for one symbol of the day's cohort.
    ///
    /// Where both are known and differ, `short_quantity` becomes
    /// `total_quantity - qty_received_t1` for that (client, symbol) pair.
    /// Rows missing either side keep their ingested `short_quantity`.
    ///
    /// The write is keyed by (client, symbol), not by settlement: when one
    /// client holds several mismatched settlements of a symbol on the same
    /// day, every one of those rows ends with the delta of the last row
    /// examined (rows are examined in id order).
    pub fn reconcile_mismatches(
        &self,
        business_date: &str,
        security_symbol: &str,
    ) -> ReconResult<SymbolReconciliation> {
        let tx = self.conn.unchecked_transaction()?;
        let result = reconcile_symbol(&tx, business_date, security_symbol, &now_stamp())?;
        tx.commit()?;
        Ok(result)
    }

    /// `reconcile_mismatches` for every symbol of the cohort, in one
    /// transaction: either every symbol is corrected or none is.
    pub fn reconcile_cohort(&self, business_date: &str) -> ReconResult<Vec<SymbolReconciliation>> {
        let tx = self.conn.unchecked_transaction()?;
        let now = now_stamp();
        let symbols = cohort_symbols(&tx, business_date)?;
        let mut results = Vec::with_capacity(symbols.len());
        for symbol in &symbols {
            results.push(reconcile_symbol(&tx, business_date, symbol, &now)?);
        }
        tx.commit()?;
        Ok(results)
    }

    // ─────────────────────────────────────────────────────────────────
    // Queries
    // ─────────────────────────────────────────────────────────────────

    /// Rows of the day's cohort that are shortaged: `short_quantity > 0`,
    /// unless the ledger total and the received quantity are both known and
    /// equal. Mirrors `ShortageRecord::is_shortaged`.
    pub fn find_positive_shortages(&self, business_date: &str) -> ReconResult<Vec<ShortageRecord>> {
        select_records(
            &self.conn,
            "business_date = ?1 AND short_quantity IS NOT NULL AND short_quantity > 0
             AND NOT (qty_received_t1 IS NOT NULL AND total_quantity IS NOT NULL
                      AND qty_received_t1 = total_quantity)",
            &[text(business_date)],
        )
    }

    /// Distinct symbols in the day's cohort, sorted.
    pub fn cohort_symbols(&self, business_date: &str) -> ReconResult<Vec<String>> {
        cohort_symbols(&self.conn, business_date)
    }

    pub fn records_for_date(&self, business_date: &str) -> ReconResult<Vec<ShortageRecord>> {
        select_records(&self.conn, "business_date = ?1", &[text(business_date)])
    }

    pub fn record_count(&self, business_date: &str) -> ReconResult<i64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM short_delivery WHERE business_date = ?1",
            params![business_date],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

fn flush_shortage_batch(
    tx: &Transaction<'_>,
    business_date: &str,
    now: &str,
    batch: &[ShortageFileRow],
) -> ReconResult<usize> {
    let placeholders = vec!["(?, ?, ?, ?, ?, ?, ?)"; batch.len()].join(", ");
    let sql = format!(
        "INSERT INTO short_delivery
         (business_date, settlement_no, security_symbol, isin, short_quantity,
          created_date, updated_date)
         VALUES {placeholders}"
    );
    let mut values: Vec<Value> = Vec::with_capacity(batch.len() * 7);
    for row in batch {
        values.push(text(business_date));
        values.push(row.settlement_no.clone().into());
        values.push(row.security_symbol.clone().into());
        values.push(row.isin.clone().into());
        values.push(row.short_quantity.into());
        values.push(text(now));
        values.push(text(now));
    }
    let inserted = tx.execute(&sql, params_from_iter(values))?;
    log::debug!("Flushed {inserted} shortage rows");
    Ok(inserted)
}

fn reconcile_symbol(
    conn: &Connection,
    business_date: &str,
    security_symbol: &str,
    now: &str,
) -> ReconResult<SymbolReconciliation> {
    let rows = select_records(
        conn,
        "business_date = ?1 AND security_symbol = ?2",
        &[text(business_date), text(security_symbol)],
    )?;

    let mut mismatches = Vec::new();
    for rec in &rows {
        let (Some(received), Some(total)) = (rec.quantity_received_t1, rec.total_quantity) else {
            continue;
        };
        if received == total {
            continue;
        }
        let short = total - received;
        conn.execute(
            "UPDATE short_delivery SET short_quantity = ?1, updated_date = ?2
             WHERE business_date = ?3 AND clnt_id IS ?4 AND security_symbol = ?5",
            params![short, now, business_date, rec.client_id, security_symbol],
        )?;
        log::info!(
            "Mismatch {security_symbol} client={} settlement={}: received={received} total={total} short={short}",
            rec.client_id.as_deref().unwrap_or("-"),
            rec.settlement_no
        );
        mismatches.push(MismatchEntry {
            settlement_no: rec.settlement_no.clone(),
            client_id: rec.client_id.clone(),
            security_symbol: security_symbol.to_string(),
            quantity_received_t1: received,
            total_quantity: total,
            short_quantity: short,
        });
    }

    Ok(SymbolReconciliation {
        security_symbol: security_symbol.to_string(),
        rows,
        mismatches,
    })
}

fn cohort_symbols(conn: &Connection, business_date: &str) -> ReconResult<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT DISTINCT security_symbol FROM short_delivery
         WHERE business_date = ?1 ORDER BY security_symbol ASC",
    )?;
    let symbols = stmt
        .query_map(params![business_date], |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(symbols)
}

fn text(s: &str) -> Value {
    Value::Text(s.to_string())
}

fn select_records(
    conn: &Connection,
    filter: &str,
    args: &[Value],
) -> ReconResult<Vec<ShortageRecord>> {
    let sql = format!(
        "SELECT {RECORD_COLUMNS} FROM short_delivery WHERE {filter}
         ORDER BY id ASC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(args.iter()), map_record_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn map_record_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ShortageRecord> {
    Ok(ShortageRecord {
        id: row.get(0)?,
        business_date: row.get(1)?,
        settlement_no: row.get(2)?,
        client_id: row.get(3)?,
        security_symbol: row.get(4)?,
        isin: row.get(5)?,
        short_quantity: row.get(6)?,
        quantity_received_t1: row.get(7)?,
        total_quantity: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}
