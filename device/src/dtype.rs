/// Element types a buffer descriptor can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[derive(strum::VariantArray, strum::Display, strum::EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum ElementType {
    F16,
    BF16,
    F32,
    F64,
    I8,
    I32,
    I64,
}

impl ElementType {
    /// Size of one element in bytes.
    pub const fn bytes(self) -> usize {
        match self {
            ElementType::I8 => 1,
            ElementType::F16 | ElementType::BF16 => 2,
            ElementType::F32 | ElementType::I32 => 4,
            ElementType::F64 | ElementType::I64 => 8,
        }
    }
}
