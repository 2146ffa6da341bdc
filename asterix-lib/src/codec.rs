//! Data Block codec and the category registry.
//!
//! A Data Block is `CAT (u8) || LEN (u16 big-endian, total block length
//! including these 3 bytes) || one or more Data Records`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::record::{self, DecodedRecord};
use crate::schema::Category;
use crate::{Error, Result};

/// One decoded Data Block.
///
/// Decoding is total-function-style: a block is always returned, with
/// `valid`/`error` describing any failure and `records` holding whatever
/// decoded before it.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct DecodedBlock {
    pub cat: u8,
    /// LEN as read from the wire.
    pub length: u16,
    pub records: Vec<DecodedRecord>,
    pub valid: bool,
    pub error: String,
}

impl DecodedBlock {
    fn invalid(error: String) -> Self {
        DecodedBlock {
            valid: false,
            error,
            ..DecodedBlock::default()
        }
    }
}

/// Registry of [Category] schemas and the decode/encode entry points.
///
/// Register categories during start-up, then share the codec freely:
/// `decode` and `encode` take `&self` and the schemas are never mutated, so
/// concurrent use on independent buffers is safe.
#[derive(Debug, Clone, Default)]
pub struct Codec {
    categories: BTreeMap<u8, Category>,
}

impl Codec {
    /// Data Block header length: CAT plus the 16-bit LEN.
    pub const HEADER_LEN: usize = 3;
    /// Largest value the LEN field can carry.
    pub const MAX_LEN: usize = 65535;

    #[must_use]
    pub fn new() -> Self {
        Codec::default()
    }

    /// Store a category schema, replacing any prior entry for the same
    /// category number.
    pub fn register_category(&mut self, cat: Category) {
        self.categories.insert(cat.number, cat);
    }

    /// Borrow a registered category.
    ///
    /// # Errors
    /// [Error::UnknownCategory] if nothing is registered under `number`.
    pub fn category(&self, number: u8) -> Result<&Category> {
        self.categories
            .get(&number)
            .ok_or(Error::UnknownCategory(number))
    }

    /// Decode one Data Block.
    ///
    /// Record decoding stops at the first failing record; the failure is
    /// recorded on the block and the records decoded before it are kept.
    #[must_use]
    pub fn decode(&self, buf: &[u8]) -> DecodedBlock {
        if buf.len() < Self::HEADER_LEN {
            return DecodedBlock::invalid(Error::Framing(format!(
                "buffer of {} bytes cannot hold a block header",
                buf.len()
            ))
            .to_string());
        }

        let mut block = DecodedBlock {
            cat: buf[0],
            length: u16::from_be_bytes([buf[1], buf[2]]),
            records: Vec::new(),
            valid: true,
            error: String::new(),
        };

        let length = block.length as usize;
        if length < Self::HEADER_LEN || length > buf.len() {
            block.valid = false;
            block.error = Error::Framing(format!(
                "LEN {} outside 3..={} for this buffer",
                length,
                buf.len()
            ))
            .to_string();
            return block;
        }

        let cat = match self.category(block.cat) {
            Ok(cat) => cat,
            Err(err) => {
                block.valid = false;
                block.error = err.to_string();
                return block;
            }
        };

        let payload = &buf[Self::HEADER_LEN..length];
        let mut pos = 0;
        while pos < payload.len() {
            match record::decode_record(cat, &payload[pos..]) {
                Ok((rec, consumed)) => {
                    if consumed == 0 {
                        block.valid = false;
                        block.error = Error::InfiniteLoop.to_string();
                        break;
                    }
                    block.records.push(rec);
                    pos += consumed;
                }
                Err(err) => {
                    debug!(cat = block.cat, "record decode failed: {err}");
                    block.valid = false;
                    block.error = err.to_string();
                    break;
                }
            }
        }

        debug!(
            cat = block.cat,
            len = block.length,
            records = block.records.len(),
            valid = block.valid,
            "decoded data block"
        );
        block
    }

    /// Encode records of one category into a complete Data Block.
    ///
    /// # Errors
    /// [Error::UnknownCategory], [Error::UnknownVariation],
    /// [Error::UnknownItem], [Error::BlockTooLarge], or any item-level
    /// encode failure. Nothing is returned on error.
    pub fn encode(&self, number: u8, records: &[DecodedRecord]) -> Result<Vec<u8>> {
        let cat = self.category(number)?;

        let mut payload = Vec::new();
        for rec in records {
            payload.extend_from_slice(&record::encode_record(cat, rec)?);
        }

        let total = Self::HEADER_LEN + payload.len();
        if total > Self::MAX_LEN {
            return Err(Error::BlockTooLarge(total));
        }

        let mut out = Vec::with_capacity(total);
        out.push(number);
        out.extend_from_slice(&(total as u16).to_be_bytes());
        out.extend_from_slice(&payload);
        Ok(out)
    }
}
