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

//! Heuristic mining of taxpayer IDs from certificate metadata.
//!
//! Labelled patterns are tried first, in order, over all given texts. The
//! unlabelled digit-group pattern is only accepted when a trust keyword is
//! close to the match and the digits carry a valid CPF checksum.

use regex::Regex;

lazy_static! {
    static ref LABELED: Vec<Regex> = vec![
        // CPF: 123.456.789-09
        Regex::new(r"(?i)\bCPF\s*[:=#]?\s*(\d{3}\.?\d{3}\.?\d{3}-?\d{2})\b").unwrap(),
        // ICP-Brasil person data: birth date (DDMMYYYY) followed by the CPF
        Regex::new(r"2\.16\.76\.1\.3\.1\s*[:=]?\s*\d{8}(\d{11})").unwrap(),
        // subject serialNumber (2.5.4.5)
        Regex::new(r"(?i)(?:\bserialNumber|2\.5\.4\.5)\s*[:=]\s*(?:CPF\s*)?(\d{11}|\d{3}\.\d{3}\.\d{3}-\d{2})\b").unwrap(),
        // e-CPF common name: "NAME SURNAME:12345678909"
        Regex::new(r"(?i)\bCN\s*=\s*[^,:=]+:(\d{11})\b").unwrap(),
        // CNPJ: 12.345.678/0001-95
        Regex::new(r"(?i)\bCNPJ\s*[:=#]?\s*(\d{2}\.?\d{3}\.?\d{3}/?\d{4}-?\d{2})\b").unwrap(),
    ];
    static ref GENERIC: Regex = Regex::new(r"\b(\d{3}\.?\d{3}\.?\d{3}-?\d{2})\b").unwrap();
    static ref TRUST_KEYWORD: Regex =
        Regex::new(r"(?i)icp|cpf|certificad|receita federal|brasil").unwrap();
}

const KEYWORD_DISTANCE: usize = 48;

/// Returns the digits of the first taxpayer ID found in `texts`.
pub fn extract_tax_id<'a, I>(texts: I) -> Option<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let texts = texts
        .into_iter()
        .filter(|t| !t.trim().is_empty())
        .collect::<Vec<_>>();

    for rx in LABELED.iter() {
        for text in &texts {
            if let Some(value) = rx.captures(text).and_then(|c| c.get(1)) {
                return Some(digits(value.as_str()));
            }
        }
    }

    for text in &texts {
        for m in GENERIC.captures_iter(text).filter_map(|c| c.get(1)) {
            let value = digits(m.as_str());
            if keyword_near(text, m.start(), m.end()) && is_valid_cpf(&value) {
                return Some(value);
            }
        }
    }

    None
}

/// Whether a signature type or authentication string refers to a
/// certificate based signature.
pub fn mentions_certificate(text: &str) -> bool {
    let text = text.to_lowercase();

    text.contains("digital") || text.contains("certificado") || text.contains("icp")
}

pub fn is_valid_cpf(value: &str) -> bool {
    let d = value.chars().filter_map(|c| c.to_digit(10)).collect::<Vec<_>>();
    if d.len() != 11 || d.iter().all(|x| *x == d[0]) {
        return false;
    }

    let check = |len: usize| {
        let sum: u32 = (0..len).map(|i| d[i] * (len as u32 + 1 - i as u32)).sum();
        let rest = (sum * 10) % 11;

        if rest == 10 {
            0
        } else {
            rest
        }
    };

    check(9) == d[9] && check(10) == d[10]
}

fn keyword_near(text: &str, start: usize, end: usize) -> bool {
    let mut from = start.saturating_sub(KEYWORD_DISTANCE);
    while !text.is_char_boundary(from) {
        from -= 1;
    }

    let mut to = (end + KEYWORD_DISTANCE).min(text.len());
    while !text.is_char_boundary(to) {
        to += 1;
    }

    TRUST_KEYWORD.is_match(&text[from..to])
}

fn digits(value: &str) -> String {
    value.chars().filter(char::is_ascii_digit).collect()
}

#[cfg(test)]
pub mod tests {
    use super::*;

    #[test]
    fn labelled_cpf() {
        let actual = extract_tax_id(vec!["OU=Pessoa Fisica, CPF: 123.456.789-09"]);

        assert_eq!(actual.as_deref(), Some("12345678909"));
    }

    #[test]
    fn ecpf_common_name() {
        let actual = extract_tax_id(vec![
            "CN=MARIA SILVA:12345678909, OU=AC SOLUTI Multipla, O=ICP-Brasil, C=BR",
        ]);

        assert_eq!(actual.as_deref(), Some("12345678909"));
    }

    #[test]
    fn icp_brasil_person_oid() {
        let actual = extract_tax_id(vec!["2.16.76.1.3.1=0101199012345678909000000"]);

        assert_eq!(actual.as_deref(), Some("12345678909"));
    }

    #[test]
    fn serial_number_attribute() {
        let actual = extract_tax_id(vec!["C=BR, serialNumber=11144477735, CN=Joao"]);

        assert_eq!(actual.as_deref(), Some("11144477735"));
    }

    #[test]
    fn labelled_patterns_win_over_generic_ones() {
        let actual = extract_tax_id(vec![
            "O=ICP-Brasil, OU=111.444.777-35",
            "CPF 123.456.789-09",
        ]);

        assert_eq!(actual.as_deref(), Some("12345678909"));
    }

    #[test]
    fn generic_pattern_requires_trust_keyword() {
        let with_keyword = extract_tax_id(vec!["O=ICP-Brasil, OU=Titular 111.444.777-35"]);
        let without_keyword = extract_tax_id(vec!["Invoice 111.444.777-35 reference"]);

        assert_eq!(with_keyword.as_deref(), Some("11144477735"));
        assert_eq!(without_keyword, None);
    }

    #[test]
    fn generic_pattern_requires_valid_checksum() {
        assert_eq!(extract_tax_id(vec!["ICP-Brasil 123.456.789-00"]), None);
    }

    #[test]
    fn empty_texts_yield_nothing() {
        assert_eq!(extract_tax_id(vec!["", "   "]), None);
    }

    #[test]
    fn certificate_keywords() {
        assert!(mentions_certificate("Assinatura Digital"));
        assert!(mentions_certificate("certificado A3"));
        assert!(mentions_certificate("ICP-Brasil"));
        assert!(!mentions_certificate("electronic"));
    }

    #[test]
    fn cpf_checksum() {
        assert!(is_valid_cpf("12345678909"));
        assert!(is_valid_cpf("111.444.777-35"));
        assert!(!is_valid_cpf("11111111111"));
        assert!(!is_valid_cpf("12345678900"));
    }
}
