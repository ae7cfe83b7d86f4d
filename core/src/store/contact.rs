use super::{ContactRecord, ShortageStore};
use crate::error::ReconResult;
use rusqlite::{params, OptionalExtension};

impl ShortageStore {
    pub fn upsert_contact(&self, contact: &ContactRecord) -> ReconResult<()> {
        self.conn.execute(
            "INSERT INTO cust_mst (party_cd, email_no, mobile_no) VALUES (?1, ?2, ?3)
             ON CONFLICT(party_cd) DO UPDATE
             SET email_no = excluded.email_no, mobile_no = excluded.mobile_no",
            params![contact.party_cd, contact.email, contact.mobile],
        )?;
        Ok(())
    }

    /// Look up a contact by its tagged party code.
    pub fn contact_for(&self, party_cd: &str) -> ReconResult<Option<ContactRecord>> {
        let contact = self
            .conn
            .query_row(
                "SELECT party_cd, email_no, mobile_no FROM cust_mst WHERE party_cd = ?1",
                params![party_cd],
                |row| {
                    Ok(ContactRecord {
                        party_cd: row.get(0)?,
                        email: row.get(1)?,
                        mobile: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(contact)
    }
}
