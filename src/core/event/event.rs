use std::fmt;

/// Identifies one registration with the reactor. Tokens are never reused, so
/// an event for a registration that has since been removed is dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Token(pub usize);

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    pub token: Token,
    pub readable: bool,
    pub error: bool,
}

impl Event {
    pub fn new(token: Token, readable: bool, error: bool) -> Self {
        Self {
            token,
            readable,
            error,
        }
    }
}
