//! Immutable Category schema model.
//!
//! A [Category] describes the bit layout of every Data Item of one ASTERIX
//! category, the UAP slot orderings mapping FSPEC bits to item ids, and an
//! optional discriminator selecting between UAP variations. Schemas are
//! produced outside this crate (typically by an XML specification loader)
//! and are never mutated by the codec.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// UAP slot sentinel: the FSPEC bit is reserved but maps to no item.
pub const UAP_UNUSED: &str = "-";
/// UAP slot sentinel: Random Field Sequencing. The bit is reserved; the
/// codec neither decodes nor emits it.
pub const UAP_RFS: &str = "rfs";

/// How downstream consumers should interpret a raw field value.
///
/// Pass-through metadata: the structural codec ignores everything here
/// except the distinction carried by [Element::spare].
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Encoding {
    #[default]
    Raw,
    /// Raw integer maps to a human-readable string via [Element::table].
    Table,
    /// Physical value = scale × raw.
    UnsignedQuantity,
    /// Physical value = scale × sign_extend(raw).
    SignedQuantity,
    /// Octal digit string, e.g. a 12-bit Mode-3/A squawk.
    StringOctal,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Presence {
    Mandatory,
    Conditional,
    #[default]
    Optional,
}

/// A single leaf bit-field inside a Data Item.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Element {
    /// Field name, e.g. "SAC". Empty for spare bits.
    pub name: String,
    /// Bit width, 1..=64.
    pub bits: usize,
    /// Spare bits are consumed on decode and zero-filled on encode, and
    /// never appear in decoded output.
    pub spare: bool,
    pub encoding: Encoding,
    /// Table encoding: raw value to description.
    pub table: BTreeMap<u64, String>,
    /// Quantity encoding: LSB scale and physical unit.
    pub scale: f64,
    pub unit: String,
    /// Informational value range.
    pub range: Option<(f64, f64)>,
}

impl Element {
    #[must_use]
    pub fn new(name: &str, bits: usize) -> Self {
        Element {
            name: name.to_string(),
            bits,
            spare: false,
            encoding: Encoding::Raw,
            table: BTreeMap::new(),
            scale: 1.0,
            unit: String::new(),
            range: None,
        }
    }

    /// A nameless run of reserved bits.
    #[must_use]
    pub fn spare(bits: usize) -> Self {
        let mut e = Element::new("", bits);
        e.spare = true;
        e
    }

    #[must_use]
    pub fn with_encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = encoding;
        self
    }

    #[must_use]
    pub fn with_scale(mut self, scale: f64, unit: &str) -> Self {
        self.scale = scale;
        self.unit = unit.to_string();
        self
    }

    #[must_use]
    pub fn with_table(mut self, entries: &[(u64, &str)]) -> Self {
        self.encoding = Encoding::Table;
        self.table = entries
            .iter()
            .map(|&(k, v)| (k, v.to_string()))
            .collect();
        self
    }

    #[must_use]
    pub fn with_range(mut self, min: f64, max: f64) -> Self {
        self.range = Some((min, max));
        self
    }
}

/// One data octet of an Extended item: seven element bits. The eighth bit
/// (LSB on the wire) is the FX continuation flag and is not represented
/// here; the codec inserts and checks it itself.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Octet {
    pub elements: Vec<Element>,
}

impl Octet {
    /// # Panics
    /// If the element widths do not sum to exactly 7 bits.
    #[must_use]
    pub fn new(elements: Vec<Element>) -> Self {
        let bits: usize = elements.iter().map(|e| e.bits).sum();
        assert!(bits == 7, "extended octet must hold 7 element bits, got {bits}");
        Octet { elements }
    }
}

/// One PSF slot of a Compound item: either unused (reserved by the
/// standard) or a fixed-size group of elements.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CompoundSubItem {
    /// Sub-item name, e.g. "COM"; [UAP_UNUSED] for a reserved slot.
    pub name: String,
    pub elements: Vec<Element>,
    /// Byte length of the sub-item payload; 0 when unused.
    pub fixed_bytes: usize,
}

impl CompoundSubItem {
    /// # Panics
    /// If the element widths do not sum to a whole number of bytes.
    #[must_use]
    pub fn new(name: &str, elements: Vec<Element>) -> Self {
        let bits: usize = elements.iter().map(|e| e.bits).sum();
        assert!(bits % 8 == 0, "sub-item {name} is {bits} bits, not whole bytes");
        CompoundSubItem {
            name: name.to_string(),
            elements,
            fixed_bytes: bits / 8,
        }
    }

    /// A reserved PSF slot.
    #[must_use]
    pub fn unused() -> Self {
        CompoundSubItem {
            name: UAP_UNUSED.to_string(),
            elements: Vec::new(),
            fixed_bytes: 0,
        }
    }

    #[must_use]
    pub fn is_unused(&self) -> bool {
        self.name == UAP_UNUSED
    }
}

/// Structural kind of a Data Item, as seen on the wire.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemKind {
    Fixed,
    Extended,
    Repetitive,
    RepetitiveGroup,
    RepetitiveGroupFx,
    Explicit,
    Compound,
}

/// Kind-specific layout data of a Data Item.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum ItemShape {
    /// Fixed byte length; one or more elements.
    Fixed {
        elements: Vec<Element>,
        fixed_bytes: usize,
    },
    /// Variable octets, each holding 7 element bits plus a trailing FX bit.
    Extended { octets: Vec<Octet> },
    /// FX-terminated list of single 7-bit values.
    Repetitive { element: Element },
    /// 1-byte repetition count, then count × fixed-size group.
    RepetitiveGroup {
        elements: Vec<Element>,
        group_bytes: usize,
    },
    /// Fixed-size groups whose last bit is FX; repeated until FX=0.
    RepetitiveGroupFx {
        elements: Vec<Element>,
        group_bytes: usize,
    },
    /// Opaque payload behind a 1-byte total length (SP and RE fields).
    Explicit,
    /// PSF-selected optional sub-items, each a fixed-size group.
    Compound { sub_items: Vec<CompoundSubItem> },
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DataItem {
    /// Item id as referenced by the UAP, e.g. "010", "SP", "RE".
    pub id: String,
    /// Human-readable title.
    pub name: String,
    pub presence: Presence,
    pub shape: ItemShape,
}

impl DataItem {
    /// # Panics
    /// If the element widths do not sum to a whole number of bytes.
    #[must_use]
    pub fn fixed(id: &str, name: &str, elements: Vec<Element>) -> Self {
        let bits: usize = elements.iter().map(|e| e.bits).sum();
        assert!(bits % 8 == 0, "item {id} is {bits} bits, not whole bytes");
        Self::with_shape(
            id,
            name,
            ItemShape::Fixed {
                elements,
                fixed_bytes: bits / 8,
            },
        )
    }

    #[must_use]
    pub fn extended(id: &str, name: &str, octets: Vec<Octet>) -> Self {
        Self::with_shape(id, name, ItemShape::Extended { octets })
    }

    /// # Panics
    /// If the repeated element is not exactly 7 bits wide.
    #[must_use]
    pub fn repetitive(id: &str, name: &str, element: Element) -> Self {
        assert!(element.bits == 7, "item {id} repetitive element must be 7 bits");
        Self::with_shape(id, name, ItemShape::Repetitive { element })
    }

    /// # Panics
    /// If the group element widths do not sum to a whole number of bytes.
    #[must_use]
    pub fn repetitive_group(id: &str, name: &str, elements: Vec<Element>) -> Self {
        let bits: usize = elements.iter().map(|e| e.bits).sum();
        assert!(bits % 8 == 0, "item {id} group is {bits} bits, not whole bytes");
        Self::with_shape(
            id,
            name,
            ItemShape::RepetitiveGroup {
                elements,
                group_bytes: bits / 8,
            },
        )
    }

    /// # Panics
    /// If the group element widths plus the FX bit do not sum to a whole
    /// number of bytes.
    #[must_use]
    pub fn repetitive_group_fx(id: &str, name: &str, elements: Vec<Element>) -> Self {
        let bits: usize = elements.iter().map(|e| e.bits).sum();
        assert!(
            (bits + 1) % 8 == 0,
            "item {id} group is {bits} bits; with FX it must be whole bytes"
        );
        Self::with_shape(
            id,
            name,
            ItemShape::RepetitiveGroupFx {
                elements,
                group_bytes: (bits + 1) / 8,
            },
        )
    }

    #[must_use]
    pub fn explicit(id: &str, name: &str) -> Self {
        Self::with_shape(id, name, ItemShape::Explicit)
    }

    #[must_use]
    pub fn compound(id: &str, name: &str, sub_items: Vec<CompoundSubItem>) -> Self {
        Self::with_shape(id, name, ItemShape::Compound { sub_items })
    }

    #[must_use]
    pub fn mandatory(mut self) -> Self {
        self.presence = Presence::Mandatory;
        self
    }

    #[must_use]
    pub fn conditional(mut self) -> Self {
        self.presence = Presence::Conditional;
        self
    }

    #[must_use]
    pub fn kind(&self) -> ItemKind {
        match self.shape {
            ItemShape::Fixed { .. } => ItemKind::Fixed,
            ItemShape::Extended { .. } => ItemKind::Extended,
            ItemShape::Repetitive { .. } => ItemKind::Repetitive,
            ItemShape::RepetitiveGroup { .. } => ItemKind::RepetitiveGroup,
            ItemShape::RepetitiveGroupFx { .. } => ItemKind::RepetitiveGroupFx,
            ItemShape::Explicit => ItemKind::Explicit,
            ItemShape::Compound { .. } => ItemKind::Compound,
        }
    }

    fn with_shape(id: &str, name: &str, shape: ItemShape) -> Self {
        DataItem {
            id: id.to_string(),
            name: name.to_string(),
            presence: Presence::Optional,
            shape,
        }
    }
}

/// UAP discriminator: after decoding `item_id`, the raw value of `field`
/// selects the UAP variation for the rest of the record.
///
/// E.g. for CAT01, I020's TYP field selects "plot" (0) or "track" (1).
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct UapCase {
    pub item_id: String,
    pub field: String,
    pub variations: BTreeMap<u64, String>,
}

impl UapCase {
    #[must_use]
    pub fn new(item_id: &str, field: &str, variations: &[(u64, &str)]) -> Self {
        UapCase {
            item_id: item_id.to_string(),
            field: field.to_string(),
            variations: variations
                .iter()
                .map(|&(k, v)| (k, v.to_string()))
                .collect(),
        }
    }
}

/// Complete definition of one ASTERIX category.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Category {
    /// Category number, 0..=255.
    pub number: u8,
    pub name: String,
    pub edition: String,
    /// All items of this category, keyed by id.
    pub items: BTreeMap<String, DataItem>,
    /// Named UAP variations: variation name to ordered slot list. Slots are
    /// item ids or the [UAP_UNUSED]/[UAP_RFS] sentinels.
    pub uap: BTreeMap<String, Vec<String>>,
    /// Variation used when no discriminator has selected another.
    pub default_uap: String,
    pub case: Option<UapCase>,
}

impl Category {
    #[must_use]
    pub fn new(number: u8, name: &str) -> Self {
        Category {
            number,
            name: name.to_string(),
            edition: String::new(),
            items: BTreeMap::new(),
            uap: BTreeMap::new(),
            default_uap: String::new(),
            case: None,
        }
    }

    #[must_use]
    pub fn with_edition(mut self, edition: &str) -> Self {
        self.edition = edition.to_string();
        self
    }

    #[must_use]
    pub fn with_item(mut self, item: DataItem) -> Self {
        self.items.insert(item.id.clone(), item);
        self
    }

    /// Register a UAP variation. The first one registered becomes the
    /// default unless [Category::with_default_uap] overrides it.
    #[must_use]
    pub fn with_uap(mut self, variation: &str, slots: Vec<String>) -> Self {
        if self.default_uap.is_empty() {
            self.default_uap = variation.to_string();
        }
        self.uap.insert(variation.to_string(), slots);
        self
    }

    #[must_use]
    pub fn with_default_uap(mut self, variation: &str) -> Self {
        self.default_uap = variation.to_string();
        self
    }

    #[must_use]
    pub fn with_case(mut self, case: UapCase) -> Self {
        self.case = Some(case);
        self
    }

    #[must_use]
    pub fn item(&self, id: &str) -> Option<&DataItem> {
        self.items.get(id)
    }

    #[must_use]
    pub fn variation(&self, name: &str) -> Option<&[String]> {
        self.uap.get(name).map(Vec::as_slice)
    }
}
