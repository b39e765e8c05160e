//! Cell-id bit-field decoding.
//!
//! A readout packs the coordinates of a hit into a single `u64`. The layout
//! is described by a descriptor string such as
//! `"system:4,layer:5,rod:10,module:10,x:32:-16,z:-16"`:
//!
//! - `name:width` places a field right after the previous one,
//! - `name:offset:width` places it at an explicit bit offset,
//! - a negative width marks a two's-complement signed field.
//!
//! Decoding is a pure function of the schema and the raw value.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use trackfit_core::Identifier;

/// Name of the field selecting the readout.
pub const SYSTEM_FIELD: &str = "system";

/// One named bit range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitField {
    name: String,
    offset: u32,
    width: u32,
    signed: bool,
}

impl BitField {
    /// Field name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Bit offset of the least significant bit.
    #[must_use]
    pub fn offset(&self) -> u32 {
        self.offset
    }

    /// Width in bits.
    #[must_use]
    pub fn width(&self) -> u32 {
        self.width
    }

    /// True for signed fields.
    #[must_use]
    pub fn is_signed(&self) -> bool {
        self.signed
    }

    /// Mask of the field in the packed value.
    #[must_use]
    pub fn mask(&self) -> u64 {
        low_bits(self.width) << self.offset
    }

    /// Smallest representable value.
    #[must_use]
    pub fn min_value(&self) -> i64 {
        match (self.signed, self.width) {
            (false, _) => 0,
            (true, 64) => i64::MIN,
            (true, width) => -(1_i64 << (width - 1)),
        }
    }

    /// Largest representable value.
    #[must_use]
    #[allow(clippy::cast_possible_wrap)]
    pub fn max_value(&self) -> i64 {
        match (self.signed, self.width) {
            (_, 64) => i64::MAX,
            (true, width) => (1_i64 << (width - 1)) - 1,
            (false, width) => low_bits(width) as i64,
        }
    }

    /// Extracts the field from a packed value.
    #[must_use]
    #[allow(clippy::cast_possible_wrap)]
    pub fn extract(&self, raw: u64) -> i64 {
        let bits = (raw >> self.offset) & low_bits(self.width);
        if self.signed && self.width < 64 && bits & (1 << (self.width - 1)) != 0 {
            (bits | !low_bits(self.width)) as i64
        } else {
            bits as i64
        }
    }

    /// Packs a value into the field position.
    ///
    /// # Errors
    /// Returns [`Error::ValueOutOfRange`] if the value does not fit.
    #[allow(clippy::cast_sign_loss)]
    pub fn pack(&self, value: i64) -> Result<u64> {
        if value < self.min_value() || value > self.max_value() {
            return Err(Error::ValueOutOfRange {
                field: self.name.clone(),
                value,
            });
        }
        Ok(((value as u64) & low_bits(self.width)) << self.offset)
    }
}

#[inline]
fn low_bits(width: u32) -> u64 {
    if width >= 64 {
        u64::MAX
    } else {
        (1_u64 << width) - 1
    }
}

/// Decoded field values, in schema order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldValues {
    values: Vec<(String, i64)>,
}

impl FieldValues {
    /// Creates an empty set of values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a value, replacing an existing one of the same name.
    pub fn set(&mut self, name: &str, value: i64) {
        match self.values.iter_mut().find(|(n, _)| n == name) {
            Some(entry) => entry.1 = value,
            None => self.values.push((name.to_string(), value)),
        }
    }

    /// Builder form of [`FieldValues::set`].
    #[must_use]
    pub fn with(mut self, name: &str, value: i64) -> Self {
        self.set(name, value);
        self
    }

    /// Value of a field, if present.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<i64> {
        self.values
            .iter()
            .find(|(n, _)| n == name)
            .map(|&(_, v)| v)
    }

    /// Iterates over `(name, value)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, i64)> {
        self.values.iter().map(|(n, v)| (n.as_str(), *v))
    }
}

impl fmt::Display for FieldValues {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (name, value)) in self.values.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{name}={value}")?;
        }
        Ok(())
    }
}

/// Parsed bit-field layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitFieldSchema {
    descriptor: String,
    fields: Vec<BitField>,
}

impl BitFieldSchema {
    /// Parses a descriptor string.
    ///
    /// # Errors
    /// Returns [`Error::InvalidSchema`] for malformed entries, zero or
    /// oversized widths, duplicate names and overlapping fields.
    pub fn parse(descriptor: &str) -> Result<Self> {
        let mut fields: Vec<BitField> = Vec::new();
        let mut cursor = 0_u32;
        let mut used = 0_u64;

        for entry in descriptor.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let parts: Vec<&str> = entry.split(':').map(str::trim).collect();
            let (name, offset, width) = match parts.as_slice() {
                [name, width] => (*name, cursor, parse_int(entry, width)?),
                [name, offset, width] => {
                    let offset = parse_int(entry, offset)?;
                    let offset = u32::try_from(offset)
                        .map_err(|_| Error::InvalidSchema(format!("negative offset in '{entry}'")))?;
                    (*name, offset, parse_int(entry, width)?)
                }
                _ => {
                    return Err(Error::InvalidSchema(format!("malformed entry '{entry}'")));
                }
            };

            if name.is_empty() {
                return Err(Error::InvalidSchema(format!("missing name in '{entry}'")));
            }
            if fields.iter().any(|f| f.name == name) {
                return Err(Error::InvalidSchema(format!("duplicate field '{name}'")));
            }

            let signed = width < 0;
            let width = u32::try_from(width.unsigned_abs())
                .map_err(|_| Error::InvalidSchema(format!("width too large in '{entry}'")))?;
            if width == 0 || offset.checked_add(width).map_or(true, |end| end > 64) {
                return Err(Error::InvalidSchema(format!(
                    "field '{name}' does not fit 64 bits (offset {offset}, width {width})"
                )));
            }

            let field = BitField {
                name: name.to_string(),
                offset,
                width,
                signed,
            };
            if used & field.mask() != 0 {
                return Err(Error::InvalidSchema(format!("field '{name}' overlaps")));
            }
            used |= field.mask();
            cursor = offset + width;
            fields.push(field);
        }

        if fields.is_empty() {
            return Err(Error::InvalidSchema("empty descriptor".to_string()));
        }

        Ok(Self {
            descriptor: descriptor.to_string(),
            fields,
        })
    }

    /// Original descriptor string.
    #[must_use]
    pub fn descriptor(&self) -> &str {
        &self.descriptor
    }

    /// Fields in declaration order.
    #[must_use]
    pub fn fields(&self) -> &[BitField] {
        &self.fields
    }

    /// Looks up a field by name.
    ///
    /// # Errors
    /// Returns [`Error::UnknownField`] if absent.
    pub fn field(&self, name: &str) -> Result<&BitField> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .ok_or_else(|| Error::UnknownField(name.to_string()))
    }

    /// Decodes every field of a packed value.
    #[must_use]
    pub fn decode(&self, raw: u64) -> FieldValues {
        FieldValues {
            values: self
                .fields
                .iter()
                .map(|f| (f.name.clone(), f.extract(raw)))
                .collect(),
        }
    }

    /// Value of a single field.
    ///
    /// # Errors
    /// Returns [`Error::UnknownField`] if absent.
    pub fn value(&self, raw: u64, name: &str) -> Result<i64> {
        Ok(self.field(name)?.extract(raw))
    }

    /// Packs field values. Fields without a value are zero.
    ///
    /// # Errors
    /// Returns [`Error::UnknownField`] for names outside the schema and
    /// [`Error::ValueOutOfRange`] for values that do not fit.
    pub fn encode(&self, values: &FieldValues) -> Result<u64> {
        values
            .iter()
            .try_fold(0_u64, |raw, (name, value)| Ok(raw | self.field(name)?.pack(value)?))
    }

    /// Clears the named fields of a packed value.
    ///
    /// # Errors
    /// Returns [`Error::UnknownField`] if a name is absent.
    pub fn clear(&self, raw: u64, names: &[&str]) -> Result<u64> {
        names
            .iter()
            .try_fold(raw, |raw, name| Ok(raw & !self.field(name)?.mask()))
    }
}

fn parse_int(entry: &str, text: &str) -> Result<i64> {
    text.parse()
        .map_err(|_| Error::InvalidSchema(format!("invalid number '{text}' in '{entry}'")))
}

/// Readout region served by one schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Region {
    /// Barrel staves.
    Barrel,
    /// Endcap petals.
    Endcap,
}

/// Cell segmentation: which fields carry the in-module position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Segmentation {
    /// Field along local x.
    pub x_field: String,
    /// Field along local y.
    pub y_field: String,
    /// Cell pitch along local x (mm).
    pub pitch_x: f64,
    /// Cell pitch along local y (mm).
    pub pitch_y: f64,
}

impl Default for Segmentation {
    fn default() -> Self {
        Self {
            x_field: "x".to_string(),
            y_field: "z".to_string(),
            pitch_x: 0.05,
            pitch_y: 0.1,
        }
    }
}

/// Barrel and endcap readouts of a tracker.
///
/// Both schemas must place the `system` field at the same bits, since it
/// selects the schema. The module identifier is the cell id with the
/// segmentation fields cleared, so volume bits and local-position bits
/// never mix.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadoutSchemas {
    barrel: BitFieldSchema,
    endcap: BitFieldSchema,
    barrel_systems: Vec<i64>,
    endcap_systems: Vec<i64>,
    segmentation: Segmentation,
}

/// Default barrel descriptor.
pub const BARREL_DESCRIPTOR: &str = "system:4,layer:5,rod:10,module:10,x:32:-16,z:-16";
/// Default endcap descriptor.
pub const ENDCAP_DESCRIPTOR: &str = "system:4,layer:5,petal:10,module:10,x:32:-16,z:-16";

impl ReadoutSchemas {
    /// Creates readouts from parsed schemas.
    ///
    /// # Errors
    /// Returns [`Error::InvalidSchema`] if a schema lacks the system or
    /// segmentation fields, or if the system fields disagree.
    pub fn new(
        barrel: BitFieldSchema,
        endcap: BitFieldSchema,
        barrel_systems: Vec<i64>,
        endcap_systems: Vec<i64>,
        segmentation: Segmentation,
    ) -> Result<Self> {
        for schema in [&barrel, &endcap] {
            for name in [
                SYSTEM_FIELD,
                segmentation.x_field.as_str(),
                segmentation.y_field.as_str(),
            ] {
                schema.field(name).map_err(|_| {
                    Error::InvalidSchema(format!(
                        "'{}' lacks field '{name}'",
                        schema.descriptor()
                    ))
                })?;
            }
        }
        if barrel.field(SYSTEM_FIELD)? != endcap.field(SYSTEM_FIELD)? {
            return Err(Error::InvalidSchema(
                "barrel and endcap disagree on the system field".to_string(),
            ));
        }
        if !(segmentation.pitch_x > 0.0 && segmentation.pitch_y > 0.0) {
            return Err(Error::InvalidSchema("cell pitch must be positive".to_string()));
        }
        Ok(Self {
            barrel,
            endcap,
            barrel_systems,
            endcap_systems,
            segmentation,
        })
    }

    /// Readouts with the default descriptors: barrel systems 10 and 12,
    /// endcap systems 11 and 13.
    ///
    /// # Errors
    /// Never fails for the built-in descriptors; the `Result` mirrors
    /// [`ReadoutSchemas::new`].
    pub fn generic() -> Result<Self> {
        Self::new(
            BitFieldSchema::parse(BARREL_DESCRIPTOR)?,
            BitFieldSchema::parse(ENDCAP_DESCRIPTOR)?,
            vec![10, 12],
            vec![11, 13],
            Segmentation::default(),
        )
    }

    /// Segmentation in use.
    #[must_use]
    pub fn segmentation(&self) -> &Segmentation {
        &self.segmentation
    }

    /// Region serving a system code.
    ///
    /// # Errors
    /// Returns [`Error::UnknownSystem`] if neither readout serves it.
    pub fn region(&self, system: i64) -> Result<Region> {
        if self.barrel_systems.contains(&system) {
            Ok(Region::Barrel)
        } else if self.endcap_systems.contains(&system) {
            Ok(Region::Endcap)
        } else {
            Err(Error::UnknownSystem(system))
        }
    }

    /// Schema of a region.
    #[must_use]
    pub fn schema(&self, region: Region) -> &BitFieldSchema {
        match region {
            Region::Barrel => &self.barrel,
            Region::Endcap => &self.endcap,
        }
    }

    /// Selects the schema for a packed cell id.
    ///
    /// # Errors
    /// Returns [`Error::UnknownSystem`] if the system code is not served.
    pub fn select(&self, raw: u64) -> Result<&BitFieldSchema> {
        let system = self.barrel.value(raw, SYSTEM_FIELD)?;
        Ok(self.schema(self.region(system)?))
    }

    /// Decodes a packed cell id with the matching schema.
    ///
    /// # Errors
    /// Returns [`Error::UnknownSystem`] if the system code is not served.
    pub fn decode(&self, raw: u64) -> Result<FieldValues> {
        Ok(self.select(raw)?.decode(raw))
    }

    /// Module identifier of a packed cell id.
    ///
    /// # Errors
    /// Returns [`Error::UnknownSystem`] if the system code is not served.
    pub fn volume_id(&self, raw: u64) -> Result<Identifier> {
        let schema = self.select(raw)?;
        let cleared = schema.clear(
            raw,
            &[
                self.segmentation.x_field.as_str(),
                self.segmentation.y_field.as_str(),
            ],
        )?;
        Ok(Identifier::new(cleared))
    }

    /// Local module coordinates of a packed cell id (mm).
    ///
    /// # Errors
    /// Returns [`Error::UnknownSystem`] if the system code is not served.
    #[allow(clippy::cast_precision_loss)]
    pub fn local_position(&self, raw: u64) -> Result<(f64, f64)> {
        let schema = self.select(raw)?;
        let x = schema.value(raw, &self.segmentation.x_field)?;
        let y = schema.value(raw, &self.segmentation.y_field)?;
        Ok((
            x as f64 * self.segmentation.pitch_x,
            y as f64 * self.segmentation.pitch_y,
        ))
    }

    /// Packs module fields into a module identifier.
    ///
    /// `fields` must not contain the system; segmentation fields are left
    /// at zero.
    ///
    /// # Errors
    /// Fails for unknown systems, unknown fields or out-of-range values.
    pub fn module_id(&self, system: i64, fields: &[(&str, i64)]) -> Result<Identifier> {
        let schema = self.schema(self.region(system)?);
        let values = fields
            .iter()
            .fold(FieldValues::new().with(SYSTEM_FIELD, system), |values, &(n, v)| {
                values.with(n, v)
            });
        Ok(Identifier::new(schema.encode(&values)?))
    }

    /// Packs a module identifier and a local position into a cell id.
    ///
    /// The position is quantised to the nearest cell.
    ///
    /// # Errors
    /// Fails for unknown systems or positions outside the field range.
    #[allow(clippy::cast_possible_truncation)]
    pub fn encode_hit(&self, module: Identifier, local_x: f64, local_y: f64) -> Result<u64> {
        let schema = self.select(module.value())?;
        let ix = (local_x / self.segmentation.pitch_x).round();
        let iy = (local_y / self.segmentation.pitch_y).round();
        if !ix.is_finite() || !iy.is_finite() {
            return Err(Error::InvalidConfig(format!(
                "non-finite local position ({local_x}, {local_y})"
            )));
        }
        let x = schema.field(&self.segmentation.x_field)?.pack(ix as i64)?;
        let y = schema.field(&self.segmentation.y_field)?.pack(iy as i64)?;
        let base = schema.clear(
            module.value(),
            &[
                self.segmentation.x_field.as_str(),
                self.segmentation.y_field.as_str(),
            ],
        )?;
        Ok(base | x | y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_layout() {
        let schema = BitFieldSchema::parse(BARREL_DESCRIPTOR).unwrap();
        let offsets: Vec<(u32, u32, bool)> = schema
            .fields()
            .iter()
            .map(|f| (f.offset(), f.width(), f.is_signed()))
            .collect();
        assert_eq!(
            offsets,
            vec![
                (0, 4, false),
                (4, 5, false),
                (9, 10, false),
                (19, 10, false),
                (32, 16, true),
                (48, 16, true),
            ]
        );
    }

    #[test]
    fn test_decode_signed_field() {
        let schema = BitFieldSchema::parse("a:4,b:-4").unwrap();
        // b = 0b1110 = -2
        let values = schema.decode(0xE3);
        assert_eq!(values.get("a"), Some(3));
        assert_eq!(values.get("b"), Some(-2));
        assert_eq!(values.to_string(), "a=3 b=-2");
    }

    #[test]
    fn test_encode_range_check() {
        let schema = BitFieldSchema::parse("a:4,b:-4").unwrap();
        let raw = schema
            .encode(&FieldValues::new().with("a", 15).with("b", -8))
            .unwrap();
        assert_eq!(schema.decode(raw).get("b"), Some(-8));

        assert!(matches!(
            schema.encode(&FieldValues::new().with("a", 16)),
            Err(Error::ValueOutOfRange { .. })
        ));
        assert!(matches!(
            schema.encode(&FieldValues::new().with("b", 8)),
            Err(Error::ValueOutOfRange { .. })
        ));
        assert!(matches!(
            schema.encode(&FieldValues::new().with("c", 0)),
            Err(Error::UnknownField(_))
        ));
    }

    #[test]
    fn test_invalid_descriptors() {
        for descriptor in ["", "a", "a:0", "a:4,a:4", "a:4,b:2:4", "a:60,b:8", "a:x"] {
            assert!(
                matches!(BitFieldSchema::parse(descriptor), Err(Error::InvalidSchema(_))),
                "{descriptor}"
            );
        }
    }

    #[test]
    fn test_full_width_field() {
        let schema = BitFieldSchema::parse("all:64").unwrap();
        assert_eq!(schema.field("all").unwrap().mask(), u64::MAX);
        assert_eq!(schema.value(42, "all").unwrap(), 42);
    }
}
