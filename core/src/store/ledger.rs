use super::ShortageStore;
use crate::error::ReconResult;
use rusqlite::params;

impl ShortageStore {
    /// Record one ledger transaction. `party_cd` keeps its client tag.
    pub fn insert_ledger_entry(
        &self,
        settlement_no: &str,
        isin: &str,
        party_cd: &str,
        trn_qty: i64,
    ) -> ReconResult<()> {
        self.conn.execute(
            "INSERT INTO trxn_table_class (settlement_no, isin, party_cd, trn_qty)
             VALUES (?1, ?2, ?3, ?4)",
            params![settlement_no, isin, party_cd, trn_qty],
        )?;
        Ok(())
    }

    /// Raw ledger sum for one (settlement, ISIN, party) triple, ignoring ISIN case.
    pub fn ledger_quantity(
        &self,
        settlement_no: &str,
        isin: &str,
        party_cd: &str,
    ) -> ReconResult<i64> {
        let total: i64 = self.conn.query_row(
            "SELECT COALESCE(SUM(trn_qty), 0)
             FROM trxn_table_class
             WHERE settlement_no = ?1 AND UPPER(isin) = UPPER(?2) AND party_cd = ?3",
            params![settlement_no, isin, party_cd],
            |row| row.get(0),
        )?;
        Ok(total)
    }

    pub fn ledger_entry_count(&self) -> ReconResult<i64> {
        let count: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM trxn_table_class", [], |row| row.get(0))?;
        Ok(count)
    }
}
