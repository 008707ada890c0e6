//! Various missing batteries for Rust

use std::{fmt, ops::Deref, str::FromStr};

/// Struct that runs the specified closure in its [`Drop`](Drop) impl
struct Guard<F: FnOnce()>(Option<F>);

impl<F: FnOnce()> Drop for Guard<F> {
    fn drop(&mut self) {
        (self.0.take().unwrap())()
    }
}

/// Returns a struct which runs the specified closure in its [`Drop`](Drop) impl
pub fn on_drop<F: FnOnce()>(f: F) -> impl Drop {
    Guard(Some(f))
}

/// Returns a struct which prints execution time info in its [`Drop`](Drop) impl.
///  It logs the inital call as well.
pub fn debug_time_it(label: &'static str) -> impl Drop {
    let start = std::time::Instant::now();
    log::debug!("{}: started", label);
    on_drop(move || log::debug!("{}: {:?}", label, start.elapsed()))
}

/// String that is guaranteed to contain at least one non-whitespace character
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct NonHollowString(String);

impl Deref for NonHollowString {
    type Target = String;
    fn deref(&self) -> &String {
        &self.0
    }
}

impl fmt::Display for NonHollowString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for NonHollowString {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        if input.trim().is_empty() {
            Err("expected a string with at least one non-whitespace character".to_owned())
        } else {
            Ok(Self(input.to_owned()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_hollow_strings() {
        assert!("".parse::<NonHollowString>().is_err());
        assert!("  \t ".parse::<NonHollowString>().is_err());
        assert_eq!(" a ".parse::<NonHollowString>().unwrap().as_str(), " a ");
    }
}
