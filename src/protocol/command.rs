//! Request-side command types shared by both wire protocols

/// Maximum key length in the memcached protocol. Valid keys are strictly shorter.
pub const MAX_KEY_LENGTH: usize = 250;

/// Storage command family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreKind {
    Add,
    Replace,
    Set,
    Prepend,
    Append,
}

impl StoreKind {
    pub fn name(self) -> &'static str {
        match self {
            StoreKind::Add => "add",
            StoreKind::Replace => "replace",
            StoreKind::Set => "set",
            StoreKind::Prepend => "prepend",
            StoreKind::Append => "append",
        }
    }

    /// Text protocol verb
    pub fn verb(self) -> &'static [u8] {
        self.name().as_bytes()
    }

    /// Append and prepend carry neither flags nor expiration in the binary protocol
    pub fn is_concat(self) -> bool {
        matches!(self, StoreKind::Prepend | StoreKind::Append)
    }
}

/// Counter direction for incr/decr
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Increment,
    Decrement,
}

impl Direction {
    pub fn flip(self) -> Self {
        match self {
            Direction::Increment => Direction::Decrement,
            Direction::Decrement => Direction::Increment,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Direction::Increment => "incr",
            Direction::Decrement => "decr",
        }
    }

    /// Text protocol verb
    pub fn verb(self) -> &'static [u8] {
        self.name().as_bytes()
    }
}

/// Check that a key has an allowed length
pub fn is_valid_key_length(key: &[u8]) -> bool {
    !key.is_empty() && key.len() < MAX_KEY_LENGTH
}

/// Check if a key can travel on the text protocol
pub fn is_valid_key(key: &[u8]) -> bool {
    if !is_valid_key_length(key) {
        return false;
    }
    // Keys cannot contain control characters or whitespace
    key.iter().all(|&b| b > 32 && b < 127)
}
