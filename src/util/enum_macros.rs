/// Generates a BACnet enumeration with named values, a vendor-proprietary
/// value range, and reserved values outside that range.
///
/// Many BACnet enumerations (property identifiers, engineering units, object
/// types) reserve a block of values for vendor extensions. This macro
/// generates an enum where standard values are named variants, values inside
/// the proprietary range become `Proprietary`, and everything else becomes
/// `Reserved`, with lossless conversion in both directions.
///
/// # Arguments
///
/// * `$name:ident` - The name of the enum to be generated.
/// * `$variant:ident = $value:expr` - A comma-separated list of named enum
///   variants and their corresponding integer values.
/// * `$unit:ident` - The underlying integer type (e.g., `u8`, `u16`, `u32`).
/// * `$range:expr` - The vendor-proprietary value range (e.g., `256..=65535`).
///
/// # Example
///
/// ```rust
/// use bacstack::vendor_range_enum;
///
/// vendor_range_enum! {
///     SampleEnum {
///         VariantA = 1,
///         VariantB = 2,
///         VariantC = 100,
///     },
///     u16,
///     1000..=2000
/// }
///
/// let a = SampleEnum::VariantA;
/// let vendor = SampleEnum::from(1500u16);
/// let reserved = SampleEnum::from(3000u16);
///
/// assert_eq!(u16::from(a), 1);
/// assert_eq!(format!("{}", a), "VariantA");
/// if let SampleEnum::Proprietary(value) = vendor {
///     assert_eq!(value.value(), 1500);
/// } else {
///     panic!("expected SampleEnum::Proprietary");
/// }
/// if let SampleEnum::Reserved(value) = reserved {
///     assert_eq!(value.value(), 3000);
/// } else {
///     panic!("expected SampleEnum::Reserved");
/// }
/// assert_eq!(SampleEnum::from(100u16), SampleEnum::VariantC);
/// ```
///
/// # Generated Code Structure
///
/// The macro generates the named variants plus:
///
/// * `Proprietary { value: $unit }` - values inside `$range` without a name.
/// * `Reserved { value: $unit }` - values outside `$range` without a name.
///
/// It also implements `Debug`, `Clone`, `Copy`, `PartialEq`, `Eq`, `Hash`,
/// `core::fmt::Display`, and `From` conversions to and from `$unit`.
#[macro_export]
macro_rules! vendor_range_enum {
    ($(#[$doc:meta])* $name:ident { $($variant:ident = $value:expr,)+ }, $unit:ident, $vendor_range:expr) => {
        pastey::paste! {
            $(#[$doc])*
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
            pub enum $name {
                $($variant,)*
                Proprietary( [<$name Value>] ),
                Reserved( [<$name Value>] ),
            }

            #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
            pub struct [<$name Value>] { value: $unit }

            impl [<$name Value>] {
                fn new(value: $unit) -> Self {
                    Self { value }
                }

                pub fn value(&self) -> $unit {
                    self.value
                }
            }

            impl core::fmt::Display for $name {
                fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                    match self {
                        $($name::$variant => write!(f, "{}", stringify!($variant)),)*
                        $name::Proprietary( value ) => write!(f, "Proprietary({})", value.value()),
                        $name::Reserved( value ) => write!(f, "Reserved({})", value.value()),
                    }
                }
            }

            impl From<$name> for $unit {
                fn from(value: $name) -> Self {
                    match value {
                        $($name::$variant => $value,)*
                        $name::Proprietary( value ) => value.value(),
                        $name::Reserved( value ) => value.value(),
                    }
                }
            }

            impl From<$unit> for $name {
                fn from(value: $unit) -> Self {
                    match value {
                        $($value => $name::$variant,)*
                        v if !($vendor_range).contains(&v) => {
                            $name::Reserved( [<$name Value>]::new(v) )
                        }
                        v if ($vendor_range).contains(&v) => {
                            $name::Proprietary( [<$name Value>]::new(v) )
                        }
                        _ => unreachable!(),
                    }
                }
            }
        }
    };
}
