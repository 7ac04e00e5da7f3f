/// Generates an enum for a protocol code point field: named variants for the
/// values defined by IEEE 1722.1, plus catch-all variants so that every wire
/// value converts losslessly.
///
/// Values inside `$custom_range` that have no name become `Custom` (typically
/// code points allocated by a later revision of the standard); anything else
/// becomes `Reserved`.
///
/// # Arguments
///
/// * `$name:ident` - The name of the enum to be generated.
/// * `$variant:ident = $value:literal` - Named variants and their wire values.
/// * `$unit:ident` - The underlying integer type (`u8`, `u16`, ...).
/// * `$range:expr` - The range of values represented by `Custom`.
///
/// # Example
///
/// ```rust
/// use avdecc_rs::generate_custom_enum;
///
/// generate_custom_enum! {
///     MyEnum {
///         VariantA = 1,
///         VariantB = 2,
///         VariantC = 100,
///     },
///     u16,
///     1000..=2000
/// }
///
/// let custom_val = MyEnum::from(1500u16);
/// let reserved_val = MyEnum::from(3000u16);
///
/// assert_eq!(u16::from(MyEnum::VariantA), 1);
/// assert_eq!(format!("{}", MyEnum::VariantA), "VariantA");
/// assert!(matches!(custom_val, MyEnum::Custom(v) if v.value() == 1500));
/// assert!(matches!(reserved_val, MyEnum::Reserved(v) if v.value() == 3000));
/// assert_eq!(MyEnum::from(100u16), MyEnum::VariantC);
/// ```
///
/// # Generated Code
///
/// * the enum, deriving `Debug`, `Clone`, `Copy`, `PartialEq`, `Eq`, `Hash`,
///   `PartialOrd` and `Ord`
/// * `std::fmt::Display` (variant name, or `Custom(n)` / `Reserved(n)`)
/// * `From<$name> for $unit` and `From<$unit> for $name`
#[macro_export]
macro_rules! generate_custom_enum {
    ($(#[$doc:meta])* $name:ident { $($variant:ident = $value:literal,)+ }, $unit:ident, $custom_range:expr) => {
        pastey::paste! {
            $(#[$doc])*
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
            pub enum $name {
                $($variant,)*
                Custom( [<$name Value>] ),
                Reserved( [<$name Value>] ),
            }

            #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
            pub struct [<$name Value>] { value: $unit }

            impl [<$name Value>] {
                fn new(value: $unit) -> Self {
                    Self { value }
                }

                pub fn value(&self) -> $unit {
                    self.value
                }
            }

            impl std::fmt::Display for $name {
                fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                    match self {
                        $($name::$variant => write!(f, "{}", stringify!($variant)),)*
                        $name::Custom( value ) => write!(f, "Custom({})", value.value()),
                        $name::Reserved( value ) => write!(f, "Reserved({})", value.value()),
                    }
                }
            }

            impl From<$name> for $unit {
                fn from(value: $name) -> Self {
                    match value {
                        $($name::$variant => $value,)*
                        $name::Custom( value ) => value.value(),
                        $name::Reserved( value ) => value.value(),
                    }
                }
            }

            impl From<$unit> for $name {
                fn from(value: $unit) -> Self {
                    match value {
                        $($value => $name::$variant,)*
                        v if ($custom_range).contains(&v) => {
                            $name::Custom( [<$name Value>]::new(v) )
                        }
                        v => $name::Reserved( [<$name Value>]::new(v) ),
                    }
                }
            }
        }
    };
}
