/*
 * Copyright (c) 2021 gematik GmbH
 * 
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 * 
 *    http://www.apache.org/licenses/LICENSE-2.0
 * 
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 *
 */

use std::fmt::{Display, Formatter, Result as FmtResult};
use std::ops::Deref;

use serde::{Deserialize, Serialize};

/// Brazilian taxpayer ID (CPF with 11 digits or CNPJ with 14 digits), stored
/// as plain digits.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TaxId(String);

impl TaxId {
    pub fn new<T: Display>(value: T) -> Result<Self, String> {
        Self::try_from(value.to_string())
    }

    pub fn as_string(&self) -> &String {
        &self.0
    }

    /// Compares against free text after stripping everything but digits.
    pub fn matches(&self, other: &str) -> bool {
        digits(other) == self.0
    }
}

impl TryFrom<String> for TaxId {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let normalized = digits(&value);

        if normalized.len() == CPF_LEN || normalized.len() == CNPJ_LEN {
            Ok(Self(normalized))
        } else {
            Err(format!("Invalid Tax ID: {}!", value))
        }
    }
}

impl From<TaxId> for String {
    fn from(v: TaxId) -> Self {
        v.0
    }
}

impl Deref for TaxId {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Display for TaxId {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        if self.0.len() == CPF_LEN {
            write!(
                f,
                "{}.{}.{}-{}",
                &self.0[0..3],
                &self.0[3..6],
                &self.0[6..9],
                &self.0[9..11]
            )
        } else {
            write!(f, "{}", self.0)
        }
    }
}

pub fn digits(value: &str) -> String {
    value.chars().filter(char::is_ascii_digit).collect()
}

const CPF_LEN: usize = 11;
const CNPJ_LEN: usize = 14;

#[cfg(test)]
pub mod tests {
    use super::*;

    #[test]
    fn normalizes_formatted_cpf() {
        let tax_id = TaxId::new("123.456.789-09").unwrap();

        assert_eq!(tax_id.as_string(), "12345678909");
        assert_eq!(tax_id.to_string(), "123.456.789-09");
        assert!(tax_id.matches("123 456 789 09"));
        assert!(!tax_id.matches("123.456.789-00"));
    }

    #[test]
    fn rejects_wrong_length() {
        assert!(TaxId::new("1234").is_err());
        assert!(TaxId::new("12.345.678/0001-95").is_ok());
    }

    #[test]
    fn serializes_as_digits() {
        let tax_id = TaxId::new("123.456.789-09").unwrap();
        let json = serde_json::to_string(&tax_id).unwrap();

        assert_eq!(json, "\"12345678909\"");
        assert!(serde_json::from_str::<TaxId>("\"1\"").is_err());
    }
}
