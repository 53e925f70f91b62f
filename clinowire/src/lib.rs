use std::fmt::Display;
use serde::ser::Impossible;
use serde::Serialize;

pub mod frame;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Endianess {
    Little,
    Big,
}

/// Layout of a serial command frame: one opcode byte followed by the fixed-size
/// fields of the command, back to back. There is no length prefix and no
/// checksum, the receiver knows the payload size from the opcode.
#[derive(Copy, Clone, Debug)]
pub struct WireConfig {
    pub endianess: Endianess,
    /// Opcode of the first enum variant, later variants count up from here.
    pub opcode_base: u8,
}
impl WireConfig {
    pub const DEFAULT: Self = Self {
        endianess: Endianess::Little,
        opcode_base: 1,
    };
}
impl Default for WireConfig {
    fn default() -> Self {
        WireConfig::DEFAULT
    }
}

#[derive(thiserror::Error, Debug)]
pub enum SerializeError {
    #[error("Variant index {0} does not fit into a one byte opcode")]
    OpcodeOverflow(u32),
    #[error("{0} have no fixed size and cannot be part of a command frame")]
    Unsupported(&'static str),
    #[error("{0}")]
    Custom(String),
}
impl serde::ser::Error for SerializeError {
    fn custom<T>(msg: T) -> Self
    where
        T: Display,
    {
        Self::Custom(msg.to_string())
    }
}

#[inline]
pub fn serialize<S: Serialize>(value: &S) -> Result<Vec<u8>, SerializeError> {
    serialize_with_config(WireConfig::DEFAULT, value)
}

pub fn serialize_with_config<S: Serialize>(config: WireConfig, value: &S) -> Result<Vec<u8>, SerializeError> {
    let mut serializer = FrameSerializer {
        config,
        data: Vec::with_capacity(16),
    };
    value.serialize(&mut serializer)?;
    Ok(serializer.data)
}

struct FrameSerializer {
    config: WireConfig,
    data: Vec<u8>,
}

impl FrameSerializer {
    fn push_opcode(&mut self, variant_index: u32) -> Result<(), SerializeError> {
        let opcode = u8::try_from(variant_index)
            .ok()
            .and_then(|index| index.checked_add(self.config.opcode_base));
        match opcode {
            Some(opcode) => {
                self.data.push(opcode);
                Ok(())
            }
            None => Err(SerializeError::OpcodeOverflow(variant_index)),
        }
    }
}

macro_rules! serialize_num {
    ($ty:ty, $fn_name:ident) => {
        fn $fn_name(self, v: $ty) -> Result<Self::Ok, Self::Error> {
            match self.config.endianess {
                Endianess::Little => self.data.extend_from_slice(&v.to_le_bytes()),
                Endianess::Big => self.data.extend_from_slice(&v.to_be_bytes()),
            }
            Ok(())
        }
    };
}

impl<'a> serde::Serializer for &'a mut FrameSerializer {
    type Ok = ();
    type Error = SerializeError;
    type SerializeSeq = Impossible<(), SerializeError>;
    type SerializeTuple = Self;
    type SerializeTupleStruct = Self;
    type SerializeTupleVariant = Self;
    type SerializeMap = Impossible<(), SerializeError>;
    type SerializeStruct = Self;
    type SerializeStructVariant = Self;

    fn serialize_bool(self, v: bool) -> Result<Self::Ok, Self::Error> {
        self.data.push(u8::from(v));
        Ok(())
    }
    serialize_num!(i8, serialize_i8);
    serialize_num!(i16, serialize_i16);
    serialize_num!(i32, serialize_i32);
    serialize_num!(i64, serialize_i64);
    serialize_num!(u8, serialize_u8);
    serialize_num!(u16, serialize_u16);
    serialize_num!(u32, serialize_u32);
    serialize_num!(u64, serialize_u64);
    serialize_num!(f32, serialize_f32);
    serialize_num!(f64, serialize_f64);

    fn serialize_char(self, _v: char) -> Result<Self::Ok, Self::Error> {
        Err(SerializeError::Unsupported("Characters"))
    }
    fn serialize_str(self, _v: &str) -> Result<Self::Ok, Self::Error> {
        Err(SerializeError::Unsupported("Strings"))
    }
    fn serialize_bytes(self, _v: &[u8]) -> Result<Self::Ok, Self::Error> {
        Err(SerializeError::Unsupported("Byte arrays"))
    }
    fn serialize_none(self) -> Result<Self::Ok, Self::Error> {
        Err(SerializeError::Unsupported("Optional fields"))
    }
    fn serialize_some<T>(self, _value: &T) -> Result<Self::Ok, Self::Error>
    where
        T: ?Sized + Serialize,
    {
        Err(SerializeError::Unsupported("Optional fields"))
    }

    #[inline]
    fn serialize_unit(self) -> Result<Self::Ok, Self::Error> {
        Ok(())
    }
    #[inline]
    fn serialize_unit_struct(self, _name: &'static str) -> Result<Self::Ok, Self::Error> {
        Ok(())
    }
    #[inline]
    fn serialize_unit_variant(self, _name: &'static str, variant_index: u32, _variant: &'static str) -> Result<Self::Ok, Self::Error> {
        self.push_opcode(variant_index)
    }
    #[inline]
    fn serialize_newtype_struct<T>(self, _name: &'static str, value: &T) -> Result<Self::Ok, Self::Error>
    where
        T: ?Sized + Serialize,
    {
        value.serialize(self)
    }
    fn serialize_newtype_variant<T>(self, _name: &'static str, variant_index: u32, _variant: &'static str, value: &T) -> Result<Self::Ok, Self::Error>
    where
        T: ?Sized + Serialize,
    {
        self.push_opcode(variant_index)?;
        value.serialize(self)
    }

    fn serialize_seq(self, _len: Option<usize>) -> Result<Self::SerializeSeq, Self::Error> {
        Err(SerializeError::Unsupported("Sequences"))
    }
    #[inline]
    fn serialize_tuple(self, _len: usize) -> Result<Self::SerializeTuple, Self::Error> {
        Ok(self)
    }
    #[inline]
    fn serialize_tuple_struct(self, _name: &'static str, _len: usize) -> Result<Self::SerializeTupleStruct, Self::Error> {
        Ok(self)
    }
    fn serialize_tuple_variant(self, _name: &'static str, variant_index: u32, _variant: &'static str, _len: usize) -> Result<Self::SerializeTupleVariant, Self::Error> {
        self.push_opcode(variant_index)?;
        Ok(self)
    }
    fn serialize_map(self, _len: Option<usize>) -> Result<Self::SerializeMap, Self::Error> {
        Err(SerializeError::Unsupported("Maps"))
    }
    #[inline]
    fn serialize_struct(self, _name: &'static str, _len: usize) -> Result<Self::SerializeStruct, Self::Error> {
        Ok(self)
    }
    fn serialize_struct_variant(self, _name: &'static str, variant_index: u32, _variant: &'static str, _len: usize) -> Result<Self::SerializeStructVariant, Self::Error> {
        self.push_opcode(variant_index)?;
        Ok(self)
    }
    fn is_human_readable(&self) -> bool {
        false
    }
}

impl<'a> serde::ser::SerializeTuple for &'a mut FrameSerializer {
    type Ok = ();
    type Error = SerializeError;

    #[inline]
    fn serialize_element<T>(&mut self, value: &T) -> Result<(), Self::Error>
    where
        T: ?Sized + Serialize,
    {
        value.serialize(&mut **self)
    }
    #[inline]
    fn end(self) -> Result<Self::Ok, Self::Error> {
        Ok(())
    }
}
impl<'a> serde::ser::SerializeTupleStruct for &'a mut FrameSerializer {
    type Ok = ();
    type Error = SerializeError;

    #[inline]
    fn serialize_field<T>(&mut self, value: &T) -> Result<(), Self::Error>
    where
        T: ?Sized + Serialize,
    {
        value.serialize(&mut **self)
    }
    #[inline]
    fn end(self) -> Result<Self::Ok, Self::Error> {
        Ok(())
    }
}
impl<'a> serde::ser::SerializeTupleVariant for &'a mut FrameSerializer {
    type Ok = ();
    type Error = SerializeError;

    #[inline]
    fn serialize_field<T>(&mut self, value: &T) -> Result<(), Self::Error>
    where
        T: ?Sized + Serialize,
    {
        value.serialize(&mut **self)
    }
    #[inline]
    fn end(self) -> Result<Self::Ok, Self::Error> {
        Ok(())
    }
}
impl<'a> serde::ser::SerializeStruct for &'a mut FrameSerializer {
    type Ok = ();
    type Error = SerializeError;

    #[inline]
    fn serialize_field<T>(&mut self, _key: &'static str, value: &T) -> Result<(), Self::Error>
    where
        T: ?Sized + Serialize,
    {
        value.serialize(&mut **self)
    }
    #[inline]
    fn end(self) -> Result<Self::Ok, Self::Error> {
        Ok(())
    }
}
impl<'a> serde::ser::SerializeStructVariant for &'a mut FrameSerializer {
    type Ok = ();
    type Error = SerializeError;

    #[inline]
    fn serialize_field<T>(&mut self, _key: &'static str, value: &T) -> Result<(), Self::Error>
    where
        T: ?Sized + Serialize,
    {
        value.serialize(&mut **self)
    }
    #[inline]
    fn end(self) -> Result<Self::Ok, Self::Error> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(serde_derive::Serialize)]
    enum Command {
        Run(f32, f32),
        Halt,
        Pump { volume: f32 },
        Label(String),
    }

    #[test]
    fn tuple_variant_is_opcode_then_le_floats() {
        let bytes = serialize(&Command::Run(2.5, 3.0)).unwrap();
        let mut expected = vec![0x01];
        expected.extend_from_slice(&2.5f32.to_le_bytes());
        expected.extend_from_slice(&3.0f32.to_le_bytes());
        assert_eq!(bytes, expected);
    }

    #[test]
    fn unit_and_struct_variants() {
        assert_eq!(serialize(&Command::Halt).unwrap(), vec![0x02]);
        let bytes = serialize(&Command::Pump { volume: 12.5 }).unwrap();
        assert_eq!(bytes[0], 0x03);
        assert_eq!(&bytes[1..], &12.5f32.to_le_bytes());
    }

    #[test]
    fn big_endian_and_zero_base() {
        let config = WireConfig {
            endianess: Endianess::Big,
            opcode_base: 0,
        };
        let bytes = serialize_with_config(config, &Command::Pump { volume: 1.0 }).unwrap();
        assert_eq!(bytes[0], 0x02);
        assert_eq!(&bytes[1..], &1.0f32.to_be_bytes());
    }

    #[test]
    fn variable_sized_fields_are_rejected() {
        let err = serialize(&Command::Label("x".into())).unwrap_err();
        assert!(matches!(err, SerializeError::Unsupported(_)));
    }

    #[test]
    fn opcode_overflow() {
        let config = WireConfig {
            endianess: Endianess::Little,
            opcode_base: 255,
        };
        let err = serialize_with_config(config, &Command::Halt).unwrap_err();
        assert!(matches!(err, SerializeError::OpcodeOverflow(1)));
    }
}
