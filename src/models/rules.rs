// Extraction rule tables for the registry result page.
// Order inside each table is precedence order: the first rule that yields a
// value for a field wins.

use lazy_static::lazy_static;
use regex::Regex;

use super::data::Field;

/// Separator between a label and its value: colons and/or whitespace.
const SEP: &str = r"\s*[:\s]+\s*";
/// Optional ordinal marker in front of numbered labels ("N°", "Nº", "N").
const ORDINAL: &str = r"N[°º]?\s*";

/// How the value following a matched label is captured.
#[derive(Debug, Clone)]
pub enum ValueShape {
    /// The rule regex carries the value in capture group 1.
    /// Captures equal to one of `reject` are skipped (they are label words).
    Capture { reject: &'static [&'static str] },
    /// Characters from `class`, stopping at the end of the line or at the
    /// next `LABEL:` on the same line.
    Phrase { class: fn(char) -> bool },
    /// Everything up to the first blank line or the end of the text.
    Paragraph,
}

#[derive(Debug)]
pub struct PatternRule {
    pub field: Field,
    pub regex: Regex,
    pub shape: ValueShape,
    /// Words that must not directly precede the label ("AÑO DE MODELO" is not "MODELO").
    pub not_after: &'static [&'static str],
}

impl PatternRule {
    fn capture(field: Field, pattern: &str, reject: &'static [&'static str]) -> Self {
        Self {
            field,
            regex: compile(pattern),
            shape: ValueShape::Capture { reject },
            not_after: &[],
        }
    }

    fn phrase(field: Field, label: &str, class: fn(char) -> bool) -> Self {
        Self {
            field,
            regex: compile(&format!("{}{}", label, SEP)),
            shape: ValueShape::Phrase { class },
            not_after: &[],
        }
    }

    fn paragraph(field: Field, label: &str) -> Self {
        Self {
            field,
            regex: compile(&format!("{}{}", label, SEP)),
            shape: ValueShape::Paragraph,
            not_after: &[],
        }
    }

    fn not_after(mut self, words: &'static [&'static str]) -> Self {
        self.not_after = words;
        self
    }
}

/// How a line is recognized as carrying a field in the line-scan pass.
#[derive(Debug, Clone)]
pub enum LineMatch {
    /// Line starts with one of the labels.
    StartsWith(&'static [&'static str]),
    /// Line contains every word in `all` (and, if non-empty, one of `any`)
    /// and none of the words in `none`.
    Contains {
        all: &'static [&'static str],
        any: &'static [&'static str],
        none: &'static [&'static str],
    },
    /// Line starts with `prefix` and contains `word` as a whole word
    /// ("N° SERIE", "NRO. DE SERIE").
    Prefixed {
        prefix: &'static str,
        word: &'static str,
    },
}

/// How the value is taken from a matched line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineValue {
    /// Remainder of the line after the label.
    Trailing,
    /// First four-digit token after the label.
    Year,
    /// Remainder of the line plus following unlabeled lines up to a blank
    /// line or a labeled line.
    Accumulate,
}

#[derive(Debug, Clone)]
pub struct LineRule {
    pub field: Field,
    pub matcher: LineMatch,
    pub value: LineValue,
}

fn compile(pattern: &str) -> Regex {
    // Patterns are static literals covered by the tests below.
    Regex::new(pattern).unwrap_or_else(|e| panic!("invalid rule pattern {}: {}", pattern, e))
}

fn letters_or_space(c: char) -> bool {
    c.is_ascii_uppercase() || c == 'Ñ' || c.is_whitespace()
}

fn alnum_or_space(c: char) -> bool {
    c.is_ascii_uppercase() || c.is_ascii_digit() || c == 'Ñ' || c.is_whitespace()
}

lazy_static! {
    /// Whole-text rules, applied to the upper-cased OCR text.
    pub static ref PATTERN_RULES: Vec<PatternRule> = vec![
        PatternRule::capture(Field::Placa, &format!(r"{}PLACA{}([A-Z0-9\-]+)", ORDINAL, SEP), &["VIGENTE", "ANTERIOR"]),
        PatternRule::capture(Field::Placa, &format!(r"PLACA{}([A-Z0-9\-]+)", SEP), &["VIGENTE", "ANTERIOR"]),
        PatternRule::capture(Field::NSerie, &format!(r"{}SERIE{}([A-Z0-9]+)", ORDINAL, SEP), &[]),
        PatternRule::capture(Field::NSerie, &format!(r"SERIE{}([A-Z0-9]+)", SEP), &[]),
        PatternRule::capture(Field::NVin, &format!(r"{}VIN{}([A-Z0-9]+)", ORDINAL, SEP), &[]),
        PatternRule::capture(Field::NVin, &format!(r"VIN{}([A-Z0-9]+)", SEP), &[]),
        PatternRule::capture(Field::NMotor, &format!(r"{}MOTOR{}([A-Z0-9]+)", ORDINAL, SEP), &[]),
        PatternRule::capture(Field::NMotor, &format!(r"MOTOR{}([A-Z0-9]+)", SEP), &[]),
        PatternRule::phrase(Field::Color, "COLOR", letters_or_space),
        PatternRule::phrase(Field::Marca, "MARCA", letters_or_space),
        PatternRule::phrase(Field::Modelo, "MODELO", alnum_or_space).not_after(&["DE", "AÑO", "ANO"]),
        PatternRule::capture(Field::PlacaVigente, &format!(r"PLACA\s+VIGENTE{}([A-Z0-9\-]+)", SEP), &[]),
        PatternRule::capture(Field::PlacaAnterior, r"PLACA\s+ANTERIOR\s*[:\s]*\s*(NINGUNA|[A-Z0-9\-]+)", &[]),
        PatternRule::phrase(Field::Estado, "ESTADO", letters_or_space),
        PatternRule::phrase(Field::Anotaciones, "ANOTACIONES", letters_or_space),
        PatternRule::phrase(Field::Sede, "SEDE", letters_or_space),
        PatternRule::capture(Field::AnioModelo, &format!(r"A[ÑN]O\s+DE\s+MODELO{}(\d{{4}})", SEP), &[]),
        PatternRule::capture(Field::AnioModelo, &format!(r"A[ÑN]O\s+MODELO{}(\d{{4}})", SEP), &[]),
        PatternRule::paragraph(Field::Propietarios, r"PROPIETARIO\s*\(\s*S\s*\)"),
        PatternRule::paragraph(Field::Propietarios, "PROPIETARIOS"),
    ];

    /// Line-scan fallback rules, applied to each upper-cased line in order.
    pub static ref LINE_RULES: Vec<LineRule> = vec![
        LineRule {
            field: Field::Placa,
            matcher: LineMatch::Contains { all: &["PLACA"], any: &[], none: &["VIGENTE", "ANTERIOR"] },
            value: LineValue::Trailing,
        },
        LineRule {
            field: Field::NSerie,
            matcher: LineMatch::Prefixed { prefix: "N", word: "SERIE" },
            value: LineValue::Trailing,
        },
        LineRule {
            field: Field::NVin,
            matcher: LineMatch::Contains { all: &["VIN"], any: &[], none: &[] },
            value: LineValue::Trailing,
        },
        LineRule {
            field: Field::NMotor,
            matcher: LineMatch::Contains { all: &["MOTOR"], any: &[], none: &[] },
            value: LineValue::Trailing,
        },
        LineRule { field: Field::Color, matcher: LineMatch::StartsWith(&["COLOR"]), value: LineValue::Trailing },
        LineRule { field: Field::Marca, matcher: LineMatch::StartsWith(&["MARCA"]), value: LineValue::Trailing },
        LineRule { field: Field::Modelo, matcher: LineMatch::StartsWith(&["MODELO"]), value: LineValue::Trailing },
        LineRule {
            field: Field::PlacaVigente,
            matcher: LineMatch::Contains { all: &["PLACA", "VIGENTE"], any: &[], none: &[] },
            value: LineValue::Trailing,
        },
        LineRule {
            field: Field::PlacaAnterior,
            matcher: LineMatch::Contains { all: &["PLACA", "ANTERIOR"], any: &[], none: &[] },
            value: LineValue::Trailing,
        },
        LineRule { field: Field::Estado, matcher: LineMatch::StartsWith(&["ESTADO"]), value: LineValue::Trailing },
        LineRule {
            field: Field::Anotaciones,
            matcher: LineMatch::StartsWith(&["ANOTACIONES"]),
            value: LineValue::Trailing,
        },
        LineRule { field: Field::Sede, matcher: LineMatch::StartsWith(&["SEDE"]), value: LineValue::Trailing },
        LineRule {
            field: Field::AnioModelo,
            matcher: LineMatch::Contains { all: &["MODELO"], any: &["AÑO", "ANO"], none: &[] },
            value: LineValue::Year,
        },
        LineRule {
            field: Field::Propietarios,
            matcher: LineMatch::Contains { all: &[], any: &["PROPIETARIO", "PROPIETARIOS"], none: &[] },
            value: LineValue::Accumulate,
        },
    ];
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_rules_compile_and_cover_schema() {
        for field in Field::ALL {
            assert!(
                PATTERN_RULES.iter().any(|r| r.field == field),
                "no pattern rule for {}",
                field.key()
            );
            assert!(
                LINE_RULES.iter().any(|r| r.field == field),
                "no line rule for {}",
                field.key()
            );
        }
    }

    #[test]
    fn test_capture_rules_have_a_group() {
        for rule in PATTERN_RULES.iter() {
            if let ValueShape::Capture { .. } = rule.shape {
                assert!(rule.regex.captures_len() >= 2, "{} has no capture group", rule.regex);
            }
        }
    }

    #[test]
    fn test_ordinal_label_variant() {
        let rule = &PATTERN_RULES[0];
        let caps = rule.regex.captures("N° PLACA: ABC-123").unwrap();
        assert_eq!(&caps[1], "ABC-123");
        let caps = rule.regex.captures("NºPLACA ABC-123").unwrap();
        assert_eq!(&caps[1], "ABC-123");
    }
}
