//! # Carved Cells
//!
//! Reconstruction of a deleted record from a matched serial-type sequence.
//! A carved cell is always a best-effort object: the bytes in front of the
//! record header (payload length, rowid) are usually overwritten, the body
//! may be cut off by a newer allocation, and the first serial type of a
//! freeblock record is gone with the freeblock header. Every uncertainty
//! is carried on the cell rather than resolved optimistically.
//!
//! ## Reconstruction Steps
//!
//! 1. Re-read the matched serial types; prepend the probabilistically
//!    recovered first type for suffix matches.
//! 2. Decode column contents forward from the header end, truncating at
//!    the cutoff (the start of whatever was carved or allocated above).
//! 3. Walk varints backward from the header to recover header length,
//!    rowid and payload length, accepting each only when it is
//!    arithmetically consistent with the matched header.

use md5::{Digest, Md5};

use crate::encoding::serial::serial_type_content_length;
use crate::encoding::{
    decode_value, decode_varint, decode_varint_reverse, twos_complement, TextEncoding, Value,
};

/// Where a carved cell was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CarvedCellKind {
    Freeblock,
    Unallocated,
}

/// Why a carved column has no value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TruncationReason {
    /// Content would cross the cutoff into newer data.
    Cutoff,
    /// The column's serial type was overwritten or undecodable.
    InvalidVarInt,
}

/// One column of a carved record.
#[derive(Debug, Clone, PartialEq)]
pub struct CarvedColumn {
    pub index: usize,
    /// `None` when the serial type itself did not survive.
    pub serial_type: Option<u64>,
    pub value: Option<Value>,
    pub truncation: Option<TruncationReason>,
}

/// A record recovered from a freeblock or unallocated region.
#[derive(Debug, Clone)]
pub struct CarvedCell {
    pub kind: CarvedCellKind,
    pub page_number: u32,
    /// Page-relative start of the earliest recovered byte.
    pub start_offset: usize,
    /// Page-relative end of the recovered body.
    pub end_offset: usize,
    /// True when at least one column could not be recovered.
    pub truncated: bool,
    /// Recovered rowid; freeblock header overwrite usually loses it, and
    /// negative rowids (9-byte varints) are unrecoverable in reverse.
    pub rowid: Option<i64>,
    pub payload_length: Option<u64>,
    pub columns: Vec<CarvedColumn>,
    /// Digest over the recovered record span, for duplicate suppression.
    pub digest: [u8; 16],
}

impl CarvedCell {
    /// Number of columns that carry a decoded value.
    pub fn recovered_column_count(&self) -> usize {
        self.columns
            .iter()
            .filter(|column| column.value.is_some())
            .count()
    }
}

/// Everything `build_carved_cell` needs about the region being carved.
#[derive(Debug, Clone, Copy)]
pub(crate) struct CarveContext<'a> {
    pub region: &'a [u8],
    /// Offset of `region[0]` within its page.
    pub region_page_offset: usize,
    pub page_number: u32,
    pub kind: CarvedCellKind,
    pub encoding: TextEncoding,
    /// Reverse varint recovery is allowed only when the bytes before the
    /// match are original (unallocated carving); a freeblock's first four
    /// bytes are overwritten and off limits.
    pub allow_reverse_recovery: bool,
}

/// Reconstructs one carved cell from a serial-type match.
///
/// `match_start..match_end` is the matched serial-type span;
/// `first_column` is the schema column the first matched type belongs to
/// (1 for suffix matches), `recovered_first` the probabilistic guess for
/// the missing first type, `column_count` the schema width and `cutoff`
/// the exclusive bound the body may not cross. Returns `None` when no
/// matched column's value survives.
#[allow(clippy::too_many_arguments)]
pub(crate) fn build_carved_cell(
    context: &CarveContext<'_>,
    match_start: usize,
    match_end: usize,
    first_column: usize,
    recovered_first: Option<u64>,
    column_count: usize,
    cutoff: usize,
) -> Option<CarvedCell> {
    let region = context.region;
    let cutoff = cutoff.min(region.len());

    // Serial types: recovered guesses for the lost head columns, then the
    // matched span, then None for columns the record never reached.
    let mut serial_types: Vec<Option<u64>> = Vec::with_capacity(column_count);
    let mut head_reasons: Vec<Option<TruncationReason>> = Vec::with_capacity(column_count);
    for column in 0..first_column {
        if column == first_column - 1 && recovered_first.is_some() {
            serial_types.push(recovered_first);
            head_reasons.push(None);
        } else {
            serial_types.push(None);
            head_reasons.push(Some(TruncationReason::InvalidVarInt));
        }
    }
    let mut offset = match_start;
    while offset < match_end && serial_types.len() < column_count {
        let (serial_type, length) = decode_varint(region, offset).ok()?;
        serial_types.push(Some(serial_type));
        head_reasons.push(None);
        offset += length;
    }
    while serial_types.len() < column_count {
        serial_types.push(None);
        head_reasons.push(Some(TruncationReason::Cutoff));
    }

    // Body decode, forward from the header end.
    let mut columns = Vec::with_capacity(column_count);
    let mut body_offset = match_end;
    let mut alignment_lost = false;
    for (index, serial_type) in serial_types.iter().enumerate() {
        let mut column = CarvedColumn {
            index,
            serial_type: *serial_type,
            value: None,
            truncation: head_reasons[index],
        };

        if let Some(serial_type) = serial_type {
            match serial_type_content_length(*serial_type) {
                Err(_) => {
                    column.truncation = Some(TruncationReason::InvalidVarInt);
                    alignment_lost = true;
                }
                Ok(content_length) => {
                    let content_length = content_length as usize;
                    if alignment_lost {
                        column.truncation = Some(TruncationReason::InvalidVarInt);
                    } else if body_offset + content_length > cutoff {
                        column.truncation = Some(TruncationReason::Cutoff);
                        alignment_lost = true;
                    } else if let Ok((value, length)) =
                        decode_value(*serial_type, region, body_offset, context.encoding)
                    {
                        column.value = Some(value);
                        body_offset += length;
                    } else {
                        column.truncation = Some(TruncationReason::Cutoff);
                        alignment_lost = true;
                    }
                }
            }
        } else if column.truncation.is_none() {
            column.truncation = Some(TruncationReason::InvalidVarInt);
        }
        if column.serial_type.is_none() {
            alignment_lost = alignment_lost || index >= first_column;
        }
        columns.push(column);
    }

    // At least one *matched* column must have decoded; a cell whose only
    // content is the probabilistic guess is noise, not a recovery.
    let matched_values = columns
        .iter()
        .skip(first_column)
        .filter(|column| column.value.is_some())
        .count();
    if matched_values == 0 {
        return None;
    }

    let truncated = columns.iter().any(|column| column.value.is_none());

    // Reverse recovery of header length, rowid and payload length.
    let mut record_start = match_start;
    let mut cell_start = match_start;
    let mut rowid = None;
    let mut payload_length = None;
    if context.allow_reverse_recovery && first_column == 0 && match_start > 0 {
        if let Ok((header_length, header_varint_length)) =
            decode_varint_reverse(region, match_start)
        {
            let header_span = (match_end - match_start) + header_varint_length;
            if header_length == header_span as u64 {
                record_start = match_start - header_varint_length;
                cell_start = record_start;
                if record_start > 0 {
                    if let Ok((rowid_raw, rowid_length)) =
                        decode_varint_reverse(region, record_start)
                    {
                        // A 9-byte (negative) rowid fails the reverse
                        // decode and stays unknown.
                        let rowid_start = record_start - rowid_length;
                        let declared_body: u64 = serial_types
                            .iter()
                            .flatten()
                            .filter_map(|&t| serial_type_content_length(t).ok())
                            .sum();
                        let expected_payload = header_span as u64 + declared_body;
                        if rowid_start > 0 {
                            if let Ok((payload_raw, payload_varint_length)) =
                                decode_varint_reverse(region, rowid_start)
                            {
                                if payload_raw == expected_payload {
                                    rowid = Some(twos_complement(rowid_raw));
                                    payload_length = Some(payload_raw);
                                    cell_start = rowid_start - payload_varint_length;
                                }
                            }
                        }
                    }
                }
            }
        }
    }

    let end = body_offset.min(cutoff);
    let digest = {
        let mut hasher = Md5::new();
        hasher.update(&region[record_start..end]);
        hasher.finalize().into()
    };

    Some(CarvedCell {
        kind: context.kind,
        page_number: context.page_number,
        start_offset: context.region_page_offset + cell_start,
        end_offset: context.region_page_offset + end,
        truncated,
        rowid,
        payload_length,
        columns,
        digest,
    })
}
