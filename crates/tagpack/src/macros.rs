//! Record macros.
//!
//! `record!` implements [`Record`](crate::Record) for a plain struct whose
//! fields all convert to and from `Value`, then wires it into the codec with
//! `record_impls!`.
//!
//! ```ignore
//! struct Args { a: i64, b: i64 }
//! tagpack::record!(Args as "Args" { a, b });
//! ```

/// Implements `Record` plus the codec traits for a struct.
#[macro_export]
macro_rules! record {
    ($ty:ident as $alias:literal { $($field:ident),* $(,)? }) => {
        impl $crate::Record for $ty {
            const ALIAS: &'static str = $alias;
            const FIELDS: &'static [&'static str] = &[$(stringify!($field)),*];

            fn to_fields(&self) -> ::std::vec::Vec<$crate::Value> {
                ::std::vec![$($crate::Value::from(::std::clone::Clone::clone(&self.$field))),*]
            }

            fn from_fields(fields: &$crate::Fields) -> $crate::Result<Self> {
                ::std::result::Result::Ok(Self {
                    $($field: fields.get(stringify!($field))?),*
                })
            }
        }

        $crate::record_impls!($ty);
    };
}

/// Implements `Encode`, `Decode`, `FromValue` and `Into<Value>` for types
/// that already implement `Record`.
#[macro_export]
macro_rules! record_impls {
    ($($ty:ty),* $(,)?) => {
        $(
            impl $crate::Encode for $ty {
                fn encode(&self, writer: &mut $crate::Writer) -> $crate::Result<()> {
                    writer.write_record(self)
                }
            }

            impl $crate::Decode for $ty {
                fn decode(reader: &mut $crate::Reader<'_>) -> $crate::Result<Self> {
                    reader.read_record::<Self>()
                }
            }

            impl $crate::FromValue for $ty {
                fn from_value(value: &$crate::Value) -> $crate::Result<Self> {
                    $crate::class::record_from_value::<Self>(value)
                }
            }

            impl ::std::convert::From<$ty> for $crate::Value {
                fn from(record: $ty) -> Self {
                    $crate::class::record_to_value(&record)
                }
            }
        )*
    };
}
