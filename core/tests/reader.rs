//! Integration tests for the delimited record reader.
//!
//! 1. Any ordering / casing / padding of the required headers is accepted
//! 2. A missing required column fails the open, naming the column
//! 3. Blank lines are skipped, short rows read as null
//! 4. Unparseable numbers become null and are counted
//! 5. Gzip input is decoded transparently

use flate2::{write::GzEncoder, Compression};
use shortage_core::{
    error::ReconError,
    reader::{
        DelimitedRecordReader, COL_CLIENT, COL_DELIVERY_QTY, COL_ISIN, COL_SETTLEMENT,
        COL_SHORT_QTY, COL_SYMBOL, DELIVERY_SCHEMA, SHORTAGE_SCHEMA,
    },
};
use std::io::{Cursor, Write};

fn plain(text: &str) -> Cursor<Vec<u8>> {
    Cursor::new(text.as_bytes().to_vec())
}

fn gzip(text: &str) -> Cursor<Vec<u8>> {
    let mut enc = GzEncoder::new(Vec::new(), Compression::default());
    enc.write_all(text.as_bytes()).unwrap();
    Cursor::new(enc.finish().unwrap())
}

// ─────────────────────────────────────────────────────────────────────────────
// Header resolution
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn header_permutations_map_rows_correctly() {
    let columns = [
        ("SctiesSttlmTxId", "S1"),
        ("ClntId", "C1"),
        ("QtyORShrtQty", "90"),
        ("TckrSymb", "ABC"),
        ("ISIN", "IN001"),
    ];
    // Rotations plus a reversal cover every column in every position.
    let mut orders: Vec<Vec<usize>> = (0..columns.len())
        .map(|r| (0..columns.len()).map(|i| (i + r) % columns.len()).collect())
        .collect();
    orders.push((0..columns.len()).rev().collect());

    for (n, order) in orders.iter().enumerate() {
        let header: Vec<String> = order
            .iter()
            .map(|&i| {
                let name = columns[i].0;
                match n % 3 {
                    0 => name.to_uppercase(),
                    1 => format!("  {}  ", name.to_lowercase()),
                    _ => name.to_string(),
                }
            })
            .collect();
        let values: Vec<&str> = order.iter().map(|&i| columns[i].1).collect();
        let text = format!("{}\n{}\n", header.join(","), values.join(","));

        let mut reader = DelimitedRecordReader::open(plain(&text), false, &DELIVERY_SCHEMA)
            .unwrap_or_else(|e| panic!("order {order:?} rejected: {e}"));
        let row = reader.next().unwrap().unwrap();
        assert_eq!(row.text(COL_SETTLEMENT), Some("S1"), "order {order:?}");
        assert_eq!(row.text(COL_CLIENT), Some("C1"), "order {order:?}");
        assert_eq!(row.integer(COL_DELIVERY_QTY), Some(90), "order {order:?}");
        assert_eq!(row.text(COL_SYMBOL), Some("ABC"), "order {order:?}");
        assert_eq!(row.text(COL_ISIN), Some("IN001"), "order {order:?}");
        assert!(reader.next().is_none());
    }
}

#[test]
fn missing_required_column_is_reported_before_any_row() {
    let text = "SctiesSttlmTxId,ClntId,TckrSymb\nS1,C1,ABC\n";
    let err = DelimitedRecordReader::open(plain(text), false, &DELIVERY_SCHEMA).unwrap_err();
    match err {
        ReconError::MissingColumns { file, missing } => {
            assert_eq!(file, "delivery");
            assert_eq!(missing, vec!["qtyorshrtqty".to_string(), "isin".to_string()]);
        }
        other => panic!("expected MissingColumns, got {other:?}"),
    }
}

#[test]
fn optional_columns_may_be_absent() {
    let text = "TckrSymb,SctiesSttlmTxId\nABC,S1\n";
    let mut reader = DelimitedRecordReader::open(plain(text), false, &SHORTAGE_SCHEMA).unwrap();
    let row = reader.next().unwrap().unwrap();
    assert_eq!(row.text(COL_SETTLEMENT), Some("S1"));
    assert_eq!(row.text(COL_ISIN), None);
    assert_eq!(row.integer(COL_SHORT_QTY), None);
    assert_eq!(reader.soft_failures(), 0);
}

#[test]
fn empty_stream_is_a_schema_error() {
    let err = DelimitedRecordReader::open(plain(""), false, &SHORTAGE_SCHEMA).unwrap_err();
    assert!(matches!(err, ReconError::EmptyFile { .. }), "got {err:?}");
}

#[test]
fn byte_order_mark_on_header_is_ignored() {
    let text = "\u{feff}SctiesSttlmTxId,TckrSymb\nS1,ABC\n";
    let mut reader = DelimitedRecordReader::open(plain(text), false, &SHORTAGE_SCHEMA).unwrap();
    assert_eq!(reader.next().unwrap().unwrap().text(COL_SETTLEMENT), Some("S1"));
}

// ─────────────────────────────────────────────────────────────────────────────
// Row tolerance
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn blank_lines_are_skipped() {
    let text = "SctiesSttlmTxId,TckrSymb,ShrtQty\nS1,ABC,5\n\n   \nS2,XYZ,7\n\n";
    let reader = DelimitedRecordReader::open(plain(text), false, &SHORTAGE_SCHEMA).unwrap();
    let rows: Vec<_> = reader.map(|r| r.unwrap()).collect();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[1].text(COL_SYMBOL), Some("XYZ"));
    assert_eq!(rows[1].integer(COL_SHORT_QTY), Some(7));
}

#[test]
fn short_rows_read_missing_fields_as_null() {
    let text = "SctiesSttlmTxId,ClntId,QtyORShrtQty,TckrSymb,ISIN\nS1,C1\n";
    let mut reader = DelimitedRecordReader::open(plain(text), false, &DELIVERY_SCHEMA).unwrap();
    let row = reader.next().unwrap().unwrap();
    assert_eq!(row.text(COL_CLIENT), Some("C1"));
    assert_eq!(row.integer(COL_DELIVERY_QTY), None);
    assert_eq!(row.text(COL_SYMBOL), None);
    assert_eq!(reader.soft_failures(), 0);
}

#[test]
fn unparseable_numbers_are_null_and_counted() {
    let text = "SctiesSttlmTxId,TckrSymb,ShrtQty\nS1,ABC,ten\nS2,XYZ,-15\nS3,PQR,\n";
    let mut reader = DelimitedRecordReader::open(plain(text), false, &SHORTAGE_SCHEMA).unwrap();
    let rows: Vec<_> = reader.by_ref().map(|r| r.unwrap()).collect();
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0].integer(COL_SHORT_QTY), None);
    assert_eq!(rows[1].integer(COL_SHORT_QTY), Some(-15));
    assert_eq!(rows[2].integer(COL_SHORT_QTY), None);
    assert_eq!(reader.soft_failures(), 1, "only the present, unparseable value counts");
    assert_eq!(reader.rows_read(), 3);
}

#[test]
fn gzip_stream_is_decoded() {
    let text = "SctiesSttlmTxId,TckrSymb,ISIN,ShrtQty\nS1,ABC,in001,12\n";
    let mut reader = DelimitedRecordReader::open(gzip(text), true, &SHORTAGE_SCHEMA).unwrap();
    let row = reader.next().unwrap().unwrap();
    assert_eq!(row.text(COL_ISIN), Some("in001"));
    assert_eq!(row.integer(COL_SHORT_QTY), Some(12));
}

#[test]
fn corrupt_gzip_fails_to_open() {
    let err = DelimitedRecordReader::open(plain("not gzip at all"), true, &SHORTAGE_SCHEMA)
        .unwrap_err();
    assert!(matches!(err, ReconError::Decode(_)), "got {err:?}");
}
