#![forbid(unsafe_code)]
#![warn(clippy::all)]

use bitflags::bitflags;

bitflags! {
    /// Access mask over {read, write}.
    ///
    /// Stored on trie nodes as `own_access`/`min_rights`/`max_rights`, and
    /// passed in as the `required` mask on a query. Never carries the
    /// "recursive" bit; that's a separate query parameter, see
    /// [`crate::lookup::check_access`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Rights: u8 {
        const READ = 0b01;
        const WRITE = 0b10;
    }
}

impl Rights {
    /// Parse a rights string containing any combination of `r`, `w`, and
    /// whitespace. Returns the offending byte on the first illegal
    /// character.
    pub fn parse(value: &str) -> Result<Rights, char> {
        let mut rights = Rights::empty();
        for ch in value.chars() {
            match ch {
                'r' => rights |= Rights::READ,
                'w' => rights |= Rights::WRITE,
                c if c.is_whitespace() => {}
                c => return Err(c),
            }
        }
        Ok(rights)
    }

    pub fn satisfies(self, required: Rights) -> bool {
        (self & required) == required
    }
}

impl std::fmt::Display for Rights {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.contains(Rights::READ) {
            write!(f, "r")?;
        }
        if self.contains(Rights::WRITE) {
            write!(f, "w")?;
        }
        Ok(())
    }
}
