//! Helper macros for parsing packed big/little endian
//! headers out of image containers.
#![allow(unused_macros, dead_code)]

use anyhow::Result;
use byteordered::{byteorder::ReadBytesExt, ByteOrdered, Endian};

/// Declare a [`Parseable`] struct whose fields are read in
/// declaration order.
///
/// A make-do for a derive macro. Supports only simple structs
/// without generics.
macro_rules! declare_parseable_struct {
    (
        $(#[$smeta:meta])*
            $svis:vis struct $sname:ident {
                $($fvis:vis $name:ident => $ty:ty $(as $ty2:ty)? ),* $(,)?
            }
    ) => {
        $(#[$smeta])*
            $svis struct $sname {
                $($fvis $name: declaration_type!($ty $(as $ty2)?)),*
            }

        impl crate::parse::Parseable for $sname {
            type Error = anyhow::Error;
            fn parse<T: byteordered::byteorder::ReadBytesExt, E: byteordered::Endian>(
                r: &mut byteordered::ByteOrdered<T, E>,
            ) -> ::core::result::Result<Self, Self::Error> {
                $(
                    let $name = anyhow::Context::with_context(
                        <$ty as crate::parse::Parseable>::parse(r),
                        || format!("parsing field `{}.{}`", stringify!($sname), stringify!($name)),
                    )? $(as $ty2)?;
                )*
                Ok($sname { $( $name ),* })
            }
        }
    };
}

/// Helper macro that expands to the parsed type or the
/// converted type.
macro_rules! declaration_type {
    ($ty:ty as $ty2:ty) => {
        $ty2
    };
    ($ty:ty) => {
        $ty
    };
}

pub(crate) trait Parseable: Sized {
    type Error;
    fn parse<T: ReadBytesExt, E: Endian>(r: &mut ByteOrdered<T, E>) -> Result<Self, Self::Error>;
}

use std::io::Error as IOError;
macro_rules! impl_parseable {
    ($ty:ty, $method:ident) => {
        impl Parseable for $ty {
            type Error = IOError;
            fn parse<T: ReadBytesExt, E: Endian>(
                r: &mut ByteOrdered<T, E>,
            ) -> Result<Self, IOError> {
                r.$method()
            }
        }
    };
}

impl_parseable!(u8, read_u8);
impl_parseable!(u16, read_u16);
impl_parseable!(u32, read_u32);
impl_parseable!(f32, read_f32);

#[test]
fn test_decl() -> Result<()> {
    declare_parseable_struct! {
        pub struct Header {
            marker => u16,
            length => u16 as usize,
        }
    }

    let bytes = [0xFFu8, 0xE1, 0x00, 0x10];
    let mut rdr = ByteOrdered::be(&bytes[..]);
    let hdr = Header::parse(&mut rdr)?;
    assert_eq!(hdr.marker, 0xFFE1);
    assert_eq!(hdr.length, 16);

    let short = [0xFFu8];
    assert!(Header::parse(&mut ByteOrdered::be(&short[..])).is_err());
    Ok(())
}
