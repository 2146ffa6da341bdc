//! Data Record framing: FSPEC, UAP slot walk, and variation selection.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::fspec::Fspec;
use crate::item::{self, DecodedItem, ItemValue};
use crate::schema::{Category, Presence, UapCase, UAP_RFS, UAP_UNUSED};
use crate::{Error, Result};

/// One decoded Data Record.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DecodedRecord {
    /// Decoded items keyed by id.
    pub items: BTreeMap<String, DecodedItem>,
    /// The UAP variation the record resolved to (or, on encode, the one to
    /// encode with; empty means the category default).
    pub uap_variation: String,
    pub valid: bool,
    pub error: String,
}

impl DecodedRecord {
    #[must_use]
    pub fn new(uap_variation: &str) -> Self {
        DecodedRecord {
            items: BTreeMap::new(),
            uap_variation: uap_variation.to_string(),
            valid: true,
            error: String::new(),
        }
    }

    /// Add an item, keyed by its id.
    pub fn insert(&mut self, item: DecodedItem) {
        self.items.insert(item.id.clone(), item);
    }

    #[must_use]
    pub fn with_item(mut self, item: DecodedItem) -> Self {
        self.insert(item);
        self
    }

    #[must_use]
    pub fn item(&self, id: &str) -> Option<&DecodedItem> {
        self.items.get(id)
    }

    #[must_use]
    pub fn has_item(&self, id: &str) -> bool {
        self.items.contains_key(id)
    }
}

fn is_sentinel(id: &str) -> bool {
    id == UAP_UNUSED || id == UAP_RFS
}

/// Decode one record from the front of `buf`, returning it and the bytes
/// consumed.
///
/// The decode is single-pass: items are walked in the default variation's
/// slot order, and when the category defines a UAP case the discriminator
/// item re-binds the slot list mid-walk. This relies on all variations
/// agreeing on the slots that precede the discriminator, which holds for
/// the published categories using cases (e.g. CAT01 plot/track).
pub(crate) fn decode_record(cat: &Category, buf: &[u8]) -> Result<(DecodedRecord, usize)> {
    let (fspec, mut pos) = Fspec::read(buf)?;

    let mut uap = cat
        .variation(&cat.default_uap)
        .ok_or_else(|| Error::UnknownVariation(cat.default_uap.clone()))?;

    let mut rec = DecodedRecord::new("");

    // The slot bound is re-checked every pass: a UAP switch mid-walk may
    // change the slot count.
    let mut slot = 0;
    while slot < uap.len() {
        slot += 1;
        let id = uap[slot - 1].as_str();
        if is_sentinel(id) || !fspec.is_set(slot) {
            continue;
        }

        let def = cat
            .item(id)
            .ok_or_else(|| Error::UnknownItem(id.to_string()))?;
        let (decoded, consumed) = item::decode_item(def, &buf[pos..])?;
        trace!(item = %id, bytes = consumed, "decoded item");
        pos += consumed;

        // UAP case: the discriminator field picks the variation for the
        // remaining slots.
        if let Some(case) = &cat.case {
            if id == case.item_id {
                if let Some(var) = resolve_variation(&decoded, case) {
                    if let Some(slots) = cat.variation(var) {
                        uap = slots;
                        rec.uap_variation = var.to_string();
                    }
                }
            }
        }

        rec.items.insert(id.to_string(), decoded);
    }

    if rec.uap_variation.is_empty() {
        rec.uap_variation = cat.default_uap.clone();
    }

    // Advisory: the record is still returned when a mandatory item is
    // absent.
    for (id, def) in &cat.items {
        if def.presence == Presence::Mandatory && !rec.items.contains_key(id) {
            rec.valid = false;
            rec.error = Error::MandatoryMissing(id.clone()).to_string();
        }
    }

    Ok((rec, pos))
}

fn resolve_variation<'a>(decoded: &DecodedItem, case: &'a UapCase) -> Option<&'a str> {
    match &decoded.value {
        ItemValue::Fields(fields) => {
            let raw = fields.get(&case.field)?;
            case.variations.get(raw).map(String::as_str)
        }
        _ => None,
    }
}

/// Encode one record: FSPEC, then the present items in UAP order.
pub(crate) fn encode_record(cat: &Category, rec: &DecodedRecord) -> Result<Vec<u8>> {
    let name = if rec.uap_variation.is_empty() {
        cat.default_uap.as_str()
    } else {
        rec.uap_variation.as_str()
    };
    let uap = cat
        .variation(name)
        .ok_or_else(|| Error::UnknownVariation(name.to_string()))?;

    // Sentinel slots never get their bit set, whatever the record carries.
    let present: Vec<bool> = uap
        .iter()
        .map(|id| !is_sentinel(id) && rec.items.contains_key(id))
        .collect();

    let mut out = Fspec::build(&present);
    for (id, &p) in uap.iter().zip(&present) {
        if !p {
            continue;
        }
        let def = cat
            .item(id)
            .ok_or_else(|| Error::UnknownItem(id.clone()))?;
        if let Some(item) = rec.items.get(id) {
            out.extend_from_slice(&item::encode_item(def, item)?);
        }
    }
    Ok(out)
}
