// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Property naming conventions between the client model and server payloads.

/// Maps client property names to server names and back.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub enum NamingConvention {
    /// Names are identical on both sides.
    #[default]
    None,
    /// Client names are camelCase, server names PascalCase.
    CamelCase,
}

impl NamingConvention {
    /// Server name → client name.
    #[must_use]
    pub fn server_to_client(self, name: &str) -> String {
        match self {
            Self::None => name.to_owned(),
            Self::CamelCase => map_first_char(name, char::to_ascii_lowercase),
        }
    }

    /// Client name → server name.
    #[must_use]
    pub fn client_to_server(self, name: &str) -> String {
        match self {
            Self::None => name.to_owned(),
            Self::CamelCase => map_first_char(name, char::to_ascii_uppercase),
        }
    }
}

fn map_first_char(name: &str, f: impl Fn(&char) -> char) -> String {
    let mut chars = name.chars();
    chars.next().map_or_else(String::new, |first| {
        let mut out = String::with_capacity(name.len());
        out.push(f(&first));
        out.push_str(chars.as_str());
        out
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn camel_case_round_trips_first_letter() {
        let c = NamingConvention::CamelCase;
        assert_eq!(c.server_to_client("OrderID"), "orderID");
        assert_eq!(c.client_to_server("orderID"), "OrderID");
        assert_eq!(c.server_to_client(""), "");
    }

    #[test]
    fn none_is_identity() {
        assert_eq!(NamingConvention::None.server_to_client("Freight"), "Freight");
    }
}
