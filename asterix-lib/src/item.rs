//! Data Item values and the per-kind structural codecs.
//!
//! Item decoders are invoked at a byte-aligned position with the remainder
//! of the record and report how many bytes they consumed; encoders return
//! the bytes to append. All field values are raw unsigned bit patterns —
//! sign extension and unit scaling belong to the layer above.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::bits::{BitReader, BitWriter};
use crate::fspec::Fspec;
use crate::schema::{CompoundSubItem, DataItem, Element, ItemKind, ItemShape, Octet};
use crate::{Error, Result};

/// Named raw field values of one item or repetitive group.
pub type Fields = BTreeMap<String, u64>;

/// Build a [Fields] map from name/value pairs.
#[must_use]
pub fn field_map(entries: &[(&str, u64)]) -> Fields {
    entries
        .iter()
        .map(|&(name, value)| (name.to_string(), value))
        .collect()
}

/// Kind-dependent payload of a decoded Data Item.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum ItemValue {
    /// Fixed / Extended: field name to raw value. Spares are excluded.
    Fields(Fields),
    /// Repetitive: the 7-bit raw values in wire order.
    Repetitions(Vec<u64>),
    /// RepetitiveGroup / RepetitiveGroupFx: one field map per group.
    Groups(Vec<Fields>),
    /// Explicit/SP/RE payload with the length byte stripped.
    Bytes(Vec<u8>),
    /// Compound: present sub-item name to that sub-item's field map.
    Compound(BTreeMap<String, Fields>),
}

/// One decoded Data Item.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DecodedItem {
    pub id: String,
    pub kind: ItemKind,
    pub value: ItemValue,
}

impl DecodedItem {
    #[must_use]
    pub fn fixed(id: &str, fields: &[(&str, u64)]) -> Self {
        DecodedItem {
            id: id.to_string(),
            kind: ItemKind::Fixed,
            value: ItemValue::Fields(field_map(fields)),
        }
    }

    #[must_use]
    pub fn extended(id: &str, fields: &[(&str, u64)]) -> Self {
        DecodedItem {
            id: id.to_string(),
            kind: ItemKind::Extended,
            value: ItemValue::Fields(field_map(fields)),
        }
    }

    #[must_use]
    pub fn repetitive(id: &str, values: &[u64]) -> Self {
        DecodedItem {
            id: id.to_string(),
            kind: ItemKind::Repetitive,
            value: ItemValue::Repetitions(values.to_vec()),
        }
    }

    #[must_use]
    pub fn repetitive_group(id: &str, groups: Vec<Fields>) -> Self {
        DecodedItem {
            id: id.to_string(),
            kind: ItemKind::RepetitiveGroup,
            value: ItemValue::Groups(groups),
        }
    }

    #[must_use]
    pub fn repetitive_group_fx(id: &str, groups: Vec<Fields>) -> Self {
        DecodedItem {
            id: id.to_string(),
            kind: ItemKind::RepetitiveGroupFx,
            value: ItemValue::Groups(groups),
        }
    }

    #[must_use]
    pub fn explicit(id: &str, payload: &[u8]) -> Self {
        DecodedItem {
            id: id.to_string(),
            kind: ItemKind::Explicit,
            value: ItemValue::Bytes(payload.to_vec()),
        }
    }

    #[must_use]
    pub fn compound(id: &str, sub_items: &[(&str, Fields)]) -> Self {
        DecodedItem {
            id: id.to_string(),
            kind: ItemKind::Compound,
            value: ItemValue::Compound(
                sub_items
                    .iter()
                    .map(|(name, fields)| (name.to_string(), fields.clone()))
                    .collect(),
            ),
        }
    }

    /// Raw value of a named field, for Fixed/Extended items.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<u64> {
        self.fields().and_then(|f| f.get(name).copied())
    }

    #[must_use]
    pub fn fields(&self) -> Option<&Fields> {
        match &self.value {
            ItemValue::Fields(f) => Some(f),
            _ => None,
        }
    }

    #[must_use]
    pub fn repetitions(&self) -> Option<&[u64]> {
        match &self.value {
            ItemValue::Repetitions(v) => Some(v),
            _ => None,
        }
    }

    #[must_use]
    pub fn groups(&self) -> Option<&[Fields]> {
        match &self.value {
            ItemValue::Groups(g) => Some(g),
            _ => None,
        }
    }

    #[must_use]
    pub fn bytes(&self) -> Option<&[u8]> {
        match &self.value {
            ItemValue::Bytes(b) => Some(b),
            _ => None,
        }
    }

    #[must_use]
    pub fn sub_items(&self) -> Option<&BTreeMap<String, Fields>> {
        match &self.value {
            ItemValue::Compound(s) => Some(s),
            _ => None,
        }
    }

    /// Field map of a named Compound sub-item.
    #[must_use]
    pub fn sub_item(&self, name: &str) -> Option<&Fields> {
        self.sub_items().and_then(|s| s.get(name))
    }
}

/// Decode one item from the front of `buf`, returning the value and the
/// bytes consumed.
pub(crate) fn decode_item(def: &DataItem, buf: &[u8]) -> Result<(DecodedItem, usize)> {
    let (value, consumed) = match &def.shape {
        ItemShape::Fixed {
            elements,
            fixed_bytes,
        } => decode_fixed(elements, *fixed_bytes, buf)?,
        ItemShape::Extended { octets } => decode_extended(octets, buf)?,
        ItemShape::Repetitive { .. } => decode_repetitive(buf)?,
        ItemShape::RepetitiveGroup {
            elements,
            group_bytes,
        } => decode_repetitive_group(elements, *group_bytes, buf)?,
        ItemShape::RepetitiveGroupFx {
            elements,
            group_bytes,
        } => decode_repetitive_group_fx(elements, *group_bytes, buf)?,
        ItemShape::Explicit => decode_explicit(&def.id, buf)?,
        ItemShape::Compound { sub_items } => decode_compound(sub_items, buf)?,
    };
    Ok((
        DecodedItem {
            id: def.id.clone(),
            kind: def.kind(),
            value,
        },
        consumed,
    ))
}

/// Encode one item to the bytes that follow the FSPEC on the wire.
pub(crate) fn encode_item(def: &DataItem, item: &DecodedItem) -> Result<Vec<u8>> {
    match (&def.shape, &item.value) {
        (ItemShape::Fixed { elements, .. }, ItemValue::Fields(fields)) => {
            let mut wr = BitWriter::new();
            encode_elements(elements, fields, &mut wr)?;
            Ok(wr.take())
        }
        (ItemShape::Extended { octets }, ItemValue::Fields(fields)) => {
            encode_extended(octets, fields)
        }
        (ItemShape::Repetitive { .. }, ItemValue::Repetitions(values)) => {
            Ok(encode_repetitive(values))
        }
        (ItemShape::RepetitiveGroup { elements, .. }, ItemValue::Groups(groups)) => {
            encode_repetitive_group(elements, groups)
        }
        (
            ItemShape::RepetitiveGroupFx {
                elements,
                group_bytes,
            },
            ItemValue::Groups(groups),
        ) => encode_repetitive_group_fx(elements, *group_bytes, groups),
        (ItemShape::Explicit, ItemValue::Bytes(payload)) => encode_explicit(&def.id, payload),
        (ItemShape::Compound { sub_items }, ItemValue::Compound(subs)) => {
            encode_compound(sub_items, subs)
        }
        _ => Err(Error::PayloadMismatch {
            id: def.id.clone(),
        }),
    }
}

fn decode_elements(elements: &[Element], rd: &mut BitReader, out: &mut Fields) -> Result<()> {
    for e in elements {
        if e.spare {
            rd.skip(e.bits)?;
            continue;
        }
        let raw = rd.read_u(e.bits)?;
        out.insert(e.name.clone(), raw);
    }
    Ok(())
}

fn encode_elements(elements: &[Element], fields: &Fields, wr: &mut BitWriter) -> Result<()> {
    for e in elements {
        if e.spare {
            wr.write_u(0, e.bits)?;
            continue;
        }
        // Fields the caller did not supply encode as zero.
        let value = fields.get(&e.name).copied().unwrap_or(0);
        wr.write_u(value, e.bits)?;
    }
    Ok(())
}

fn decode_fixed(
    elements: &[Element],
    fixed_bytes: usize,
    buf: &[u8],
) -> Result<(ItemValue, usize)> {
    if buf.len() < fixed_bytes {
        return Err(Error::Truncated {
            actual: buf.len(),
            minimum: fixed_bytes,
        });
    }
    let mut rd = BitReader::new(&buf[..fixed_bytes]);
    let mut fields = Fields::new();
    decode_elements(elements, &mut rd, &mut fields)?;
    Ok((ItemValue::Fields(fields), fixed_bytes))
}

fn decode_extended(octets: &[Octet], buf: &[u8]) -> Result<(ItemValue, usize)> {
    let mut fields = Fields::new();
    let mut offset = 0;
    for idx in 0.. {
        let Some(&raw) = buf.get(offset) else {
            return Err(Error::Truncated {
                actual: buf.len(),
                minimum: offset + 1,
            });
        };
        offset += 1;
        let fx = raw & 0x01 != 0;
        if let Some(oct) = octets.get(idx) {
            let mut rd = BitReader::new(&buf[offset - 1..offset]);
            decode_elements(&oct.elements, &mut rd, &mut fields)?;
        }
        // Octets past the schema definition are discarded; FX still applies.
        if !fx {
            break;
        }
    }
    Ok((ItemValue::Fields(fields), offset))
}

fn encode_extended(octets: &[Octet], fields: &Fields) -> Result<Vec<u8>> {
    // Emit up to the last octet carrying a non-zero field, at least one.
    let mut last_useful = 0;
    for (i, oct) in octets.iter().enumerate() {
        for e in &oct.elements {
            if !e.spare && fields.get(&e.name).copied().unwrap_or(0) != 0 {
                last_useful = i + 1;
            }
        }
    }
    let last_useful = last_useful.max(1);

    let mut wr = BitWriter::new();
    for (i, oct) in octets.iter().take(last_useful).enumerate() {
        encode_elements(&oct.elements, fields, &mut wr)?;
        wr.write_bit(i + 1 < last_useful);
    }
    Ok(wr.take())
}

fn decode_repetitive(buf: &[u8]) -> Result<(ItemValue, usize)> {
    let mut values = Vec::new();
    let mut offset = 0;
    loop {
        let Some(&raw) = buf.get(offset) else {
            return Err(Error::Truncated {
                actual: buf.len(),
                minimum: offset + 1,
            });
        };
        offset += 1;
        values.push(u64::from((raw >> 1) & 0x7F));
        if raw & 0x01 == 0 {
            break;
        }
    }
    Ok((ItemValue::Repetitions(values), offset))
}

fn encode_repetitive(values: &[u64]) -> Vec<u8> {
    // The wire cannot express zero entries: an empty list still emits one
    // zero octet, which decodes back as a single zero-valued entry. Callers
    // wanting no repetition omit the item via FSPEC.
    if values.is_empty() {
        return vec![0x00];
    }
    values
        .iter()
        .enumerate()
        .map(|(i, &v)| (((v & 0x7F) as u8) << 1) | u8::from(i + 1 < values.len()))
        .collect()
}

fn decode_repetitive_group(
    elements: &[Element],
    group_bytes: usize,
    buf: &[u8],
) -> Result<(ItemValue, usize)> {
    let Some(&count) = buf.first() else {
        return Err(Error::Truncated {
            actual: 0,
            minimum: 1,
        });
    };
    let count = count as usize;
    let needed = 1 + count * group_bytes;
    if buf.len() < needed {
        return Err(Error::Truncated {
            actual: buf.len(),
            minimum: needed,
        });
    }
    let mut rd = BitReader::new(&buf[1..needed]);
    let mut groups = Vec::with_capacity(count);
    for _ in 0..count {
        let mut sub = rd.sub_reader(group_bytes)?;
        let mut fields = Fields::new();
        decode_elements(elements, &mut sub, &mut fields)?;
        groups.push(fields);
    }
    Ok((ItemValue::Groups(groups), needed))
}

fn encode_repetitive_group(elements: &[Element], groups: &[Fields]) -> Result<Vec<u8>> {
    if groups.len() > 255 {
        return Err(Error::TooManyGroups(groups.len()));
    }
    let mut wr = BitWriter::new();
    wr.write_byte(groups.len() as u8);
    for g in groups {
        encode_elements(elements, g, &mut wr)?;
    }
    Ok(wr.take())
}

fn decode_repetitive_group_fx(
    elements: &[Element],
    group_bytes: usize,
    buf: &[u8],
) -> Result<(ItemValue, usize)> {
    let mut groups = Vec::new();
    let mut offset = 0;
    loop {
        if buf.len() < offset + group_bytes {
            return Err(Error::Truncated {
                actual: buf.len() - offset,
                minimum: group_bytes,
            });
        }
        let mut rd = BitReader::new(&buf[offset..offset + group_bytes]);
        let mut fields = Fields::new();
        decode_elements(elements, &mut rd, &mut fields)?;
        let fx = rd.read_bit()?;
        offset += group_bytes;
        groups.push(fields);
        if !fx {
            break;
        }
    }
    Ok((ItemValue::Groups(groups), offset))
}

fn encode_repetitive_group_fx(
    elements: &[Element],
    group_bytes: usize,
    groups: &[Fields],
) -> Result<Vec<u8>> {
    if groups.is_empty() {
        // Zero groups are inexpressible; emit one zero-filled group, FX=0.
        return Ok(vec![0; group_bytes]);
    }
    let mut wr = BitWriter::new();
    for (i, g) in groups.iter().enumerate() {
        encode_elements(elements, g, &mut wr)?;
        wr.write_bit(i + 1 < groups.len());
    }
    Ok(wr.take())
}

fn decode_explicit(id: &str, buf: &[u8]) -> Result<(ItemValue, usize)> {
    let Some(&len) = buf.first() else {
        return Err(Error::Truncated {
            actual: 0,
            minimum: 1,
        });
    };
    let len = len as usize;
    if len == 0 {
        return Err(Error::BadLength(format!("item {id}: length byte is zero")));
    }
    if buf.len() < len {
        return Err(Error::Truncated {
            actual: buf.len(),
            minimum: len,
        });
    }
    Ok((ItemValue::Bytes(buf[1..len].to_vec()), len))
}

fn encode_explicit(id: &str, payload: &[u8]) -> Result<Vec<u8>> {
    // The length byte counts itself.
    let total = payload.len() + 1;
    if total > 255 {
        return Err(Error::BadLength(format!(
            "item {id}: {} payload bytes",
            payload.len()
        )));
    }
    let mut out = Vec::with_capacity(total);
    out.push(total as u8);
    out.extend_from_slice(payload);
    Ok(out)
}

fn decode_compound(sub_items: &[CompoundSubItem], buf: &[u8]) -> Result<(ItemValue, usize)> {
    // The PSF bitmap uses the same byte layout and FX rule as FSPEC.
    let (psf, mut offset) = Fspec::read(buf).map_err(|err| match err {
        Error::EmptyFspec => Error::Truncated {
            actual: 0,
            minimum: 1,
        },
        other => other,
    })?;

    let mut subs = BTreeMap::new();
    for (slot, sub) in sub_items.iter().enumerate() {
        if !psf.is_set(slot + 1) || sub.is_unused() {
            continue;
        }
        if buf.len() < offset + sub.fixed_bytes {
            return Err(Error::Truncated {
                actual: buf.len() - offset,
                minimum: sub.fixed_bytes,
            });
        }
        let mut rd = BitReader::new(&buf[offset..offset + sub.fixed_bytes]);
        let mut fields = Fields::new();
        decode_elements(&sub.elements, &mut rd, &mut fields)?;
        offset += sub.fixed_bytes;
        subs.insert(sub.name.clone(), fields);
    }
    Ok((ItemValue::Compound(subs), offset))
}

fn encode_compound(
    sub_items: &[CompoundSubItem],
    subs: &BTreeMap<String, Fields>,
) -> Result<Vec<u8>> {
    let present: Vec<bool> = sub_items
        .iter()
        .map(|s| !s.is_unused() && subs.contains_key(&s.name))
        .collect();

    let mut out = Fspec::build(&present);
    for (sub, &p) in sub_items.iter().zip(&present) {
        if !p {
            continue;
        }
        if let Some(fields) = subs.get(&sub.name) {
            let mut wr = BitWriter::new();
            encode_elements(&sub.elements, fields, &mut wr)?;
            out.extend_from_slice(&wr.take());
        }
    }
    Ok(out)
}
