// Field extraction from recognized registry text.
// Pass 1 runs the whole-text pattern rules, pass 2 scans line by line and
// only fills fields pass 1 left empty.

use lazy_static::lazy_static;
use log::debug;
use regex::Regex;

use crate::models::rules::{
    LineMatch, LineRule, LineValue, PatternRule, ValueShape, LINE_RULES, PATTERN_RULES,
};
use crate::models::{Field, VehicleRecord};

lazy_static! {
    /// Optional blanks, then the end of the line or of the text.
    static ref LINE_END: Regex = Regex::new(r"\A[^\S\n]*(?:\n|\z)").unwrap();
    /// Whitespace, then a single-word `LABEL:` (with optional ordinal).
    static ref NEXT_LABEL: Regex = Regex::new(r"\A\s+(?:N[°º]?\s*)?[A-ZÑ()]+\s*:").unwrap();
}

/// Placeholder some result pages print instead of a plate.
const MISSING_PLATE: &str = "N/A";

pub struct FieldExtractor;

impl FieldExtractor {
    /// Map OCR text onto the registry schema. Never fails: fields that cannot
    /// be found stay empty, and `placa` falls back to `fallback_plate`.
    pub fn parse(text: &str, fallback_plate: &str) -> VehicleRecord {
        let mut record = VehicleRecord {
            raw_text: text.to_string(),
            ..Default::default()
        };

        let upper = text.to_uppercase();
        Self::apply_pattern_rules(&upper, &mut record);
        Self::apply_line_rules(&upper, &mut record);
        Self::apply_fallback_plate(&mut record, fallback_plate);

        debug!(
            "Parsed {} of {} fields for {}",
            record.populated_fields(),
            Field::ALL.len(),
            record.placa
        );
        record
    }

    fn apply_pattern_rules(upper: &str, record: &mut VehicleRecord) {
        for rule in PATTERN_RULES.iter() {
            if !record.is_empty(rule.field) {
                continue;
            }
            if let Some(value) = Self::match_pattern_rule(rule, upper) {
                record.set_if_empty(rule.field, &value);
            }
        }
    }

    /// First acceptable value for the rule, scanning label occurrences left
    /// to right.
    fn match_pattern_rule(rule: &PatternRule, upper: &str) -> Option<String> {
        for caps in rule.regex.captures_iter(upper) {
            let label = match caps.get(0) {
                Some(m) => m,
                None => continue,
            };
            if Self::preceded_by_any(&upper[..label.start()], rule.not_after) {
                continue;
            }

            let value = match &rule.shape {
                ValueShape::Capture { reject } => match caps.get(1) {
                    Some(m) if !reject.iter().any(|r| *r == m.as_str()) => Some(m.as_str()),
                    _ => None,
                },
                ValueShape::Phrase { class } => Self::phrase_value(&upper[label.end()..], *class),
                ValueShape::Paragraph => {
                    if label.as_str().contains("\n\n") {
                        None
                    } else {
                        Self::paragraph_value(&upper[label.end()..])
                    }
                }
            };

            if let Some(value) = value.map(collapse_whitespace).filter(|v| !v.is_empty()) {
                return Some(value);
            }
        }
        None
    }

    /// Shortest run of `class` characters that ends at a line end or right
    /// before another `LABEL:` on the same line.
    fn phrase_value(rest: &str, class: fn(char) -> bool) -> Option<&str> {
        let run_end = rest
            .char_indices()
            .find(|(_, c)| !class(*c))
            .map_or(rest.len(), |(i, _)| i);
        if run_end == 0 {
            return None;
        }

        let boundaries = rest[..run_end]
            .char_indices()
            .skip(1)
            .map(|(i, _)| i)
            .chain(std::iter::once(run_end));
        for end in boundaries {
            let tail = &rest[end..];
            if LINE_END.is_match(tail) || NEXT_LABEL.is_match(tail) {
                return Some(&rest[..end]);
            }
        }
        None
    }

    /// Text up to the first blank line or the end.
    fn paragraph_value(rest: &str) -> Option<&str> {
        let end = rest.find("\n\n").unwrap_or(rest.len());
        Some(&rest[..end]).filter(|v| !v.trim().is_empty())
    }

    fn preceded_by_any(before: &str, words: &[&str]) -> bool {
        let before = before.trim_end();
        words.iter().any(|word| {
            before.ends_with(word)
                && before[..before.len() - word.len()]
                    .chars()
                    .next_back()
                    .map_or(true, |c| !is_word_char(c))
        })
    }

    fn apply_line_rules(upper: &str, record: &mut VehicleRecord) {
        let lines: Vec<&str> = upper.split('\n').map(str::trim).collect();

        for (index, line) in lines.iter().enumerate() {
            if line.is_empty() {
                continue;
            }
            for rule in LINE_RULES.iter() {
                if !record.is_empty(rule.field) {
                    continue;
                }
                let label_end = match Self::match_line(rule, line) {
                    Some(end) => end,
                    None => continue,
                };
                if let Some(value) = Self::line_value(rule, &lines, index, label_end) {
                    record.set_if_empty(rule.field, &value);
                }
            }
        }
    }

    /// Byte offset where the label ends when the rule matches the line.
    fn match_line(rule: &LineRule, line: &str) -> Option<usize> {
        match &rule.matcher {
            LineMatch::StartsWith(labels) => labels
                .iter()
                .find(|label| line.starts_with(*label))
                .map(|label| chunk_end(line, label.len())),
            LineMatch::Contains { all, any, none } => {
                let tokens = word_tokens(line);
                let has = |word: &&str| tokens.iter().any(|t| t == word);

                if !all.iter().all(has) || none.iter().any(has) {
                    return None;
                }
                if !any.is_empty() && !any.iter().any(has) {
                    return None;
                }

                all.iter()
                    .chain(any.iter().filter(|w| has(*w)))
                    .filter_map(|word| find_word(line, word))
                    .map(|(_, end)| chunk_end(line, end))
                    .max()
            }
            LineMatch::Prefixed { prefix, word } => {
                if !line.starts_with(prefix) {
                    return None;
                }
                find_word(line, word).map(|(_, end)| chunk_end(line, end))
            }
        }
    }

    fn line_value(rule: &LineRule, lines: &[&str], index: usize, label_end: usize) -> Option<String> {
        let line = lines[index];
        let trailing = strip_separators(&line[label_end..]);

        match rule.value {
            LineValue::Trailing => {
                if !trailing.is_empty() {
                    return Some(collapse_whitespace(trailing));
                }
                Self::continuation(lines, index).map(collapse_whitespace)
            }
            LineValue::Year => {
                let source = if trailing.is_empty() {
                    Self::continuation(lines, index)?
                } else {
                    trailing
                };
                first_year(source)
            }
            LineValue::Accumulate => {
                let mut parts: Vec<&str> = Vec::new();
                if !trailing.is_empty() {
                    parts.push(trailing);
                }
                for next in &lines[index + 1..] {
                    if next.is_empty() || next.contains(':') {
                        break;
                    }
                    parts.push(*next);
                }
                Some(collapse_whitespace(&parts.join(" "))).filter(|v| !v.is_empty())
            }
        }
    }

    /// Value printed on the line after a bare `LABEL:` line.
    fn continuation<'a>(lines: &[&'a str], index: usize) -> Option<&'a str> {
        if !lines[index].ends_with(':') {
            return None;
        }
        lines[index + 1..]
            .iter()
            .find(|l| !l.is_empty())
            .filter(|l| !l.contains(':'))
            .copied()
    }

    fn apply_fallback_plate(record: &mut VehicleRecord, fallback_plate: &str) {
        if record.placa.is_empty() || record.placa == MISSING_PLATE {
            record.set(Field::Placa, fallback_plate.to_string());
        }
    }
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() && c != 'º' && c != 'ª'
}

fn word_tokens(line: &str) -> Vec<&str> {
    line.split(|c: char| !is_word_char(c))
        .filter(|t| !t.is_empty())
        .collect()
}

/// Byte span of the first whole-word occurrence of `word`.
fn find_word(line: &str, word: &str) -> Option<(usize, usize)> {
    line.match_indices(word).map(|(start, _)| (start, start + word.len())).find(|&(start, end)| {
        let before_ok = line[..start].chars().next_back().map_or(true, |c| !is_word_char(c));
        let after_ok = line[end..].chars().next().map_or(true, |c| !is_word_char(c));
        before_ok && after_ok
    })
}

/// End of the label chunk starting before `from`: labels run until a colon or
/// whitespace ("PROPIETARIO(S):", "N°SERIE:").
fn chunk_end(line: &str, from: usize) -> usize {
    line[from..]
        .char_indices()
        .find(|(_, c)| *c == ':' || c.is_whitespace())
        .map_or(line.len(), |(i, _)| from + i)
}

fn strip_separators(value: &str) -> &str {
    value
        .trim_start_matches(|c: char| c == ':' || c == '.' || c == '°' || c == 'º' || c.is_whitespace())
        .trim_end()
}

fn first_year(value: &str) -> Option<String> {
    value
        .split(|c: char| c == ':' || c.is_whitespace())
        .filter_map(|token| token.get(..4))
        .find(|head| head.chars().all(|c| c.is_ascii_digit()))
        .map(str::to_string)
}

fn collapse_whitespace(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_labeled_lines() {
        let text = "MARCA: TOYOTA\nMODELO: COROLLA\nCOLOR: BLANCO\nPLACA: XYZ-789";
        let record = FieldExtractor::parse(text, "FALLBACK");
        assert_eq!(record.marca, "TOYOTA");
        assert_eq!(record.modelo, "COROLLA");
        assert_eq!(record.color, "BLANCO");
        assert_eq!(record.placa, "XYZ-789");
        assert_eq!(record.raw_text, text);
    }

    #[test]
    fn test_owner_paragraph_stops_at_blank_line() {
        let text = "PROPIETARIO(S): JUAN PEREZ\nMARIA LOPEZ\n\nESTADO: ACTIVO";
        let record = FieldExtractor::parse(text, "ABC-123");
        assert_eq!(record.propietarios, "JUAN PEREZ MARIA LOPEZ");
        assert_eq!(record.estado, "ACTIVO");
    }

    #[test]
    fn test_empty_text_only_has_fallback_plate() {
        let record = FieldExtractor::parse("", "ABC-123");
        assert_eq!(record.placa, "ABC-123");
        for field in Field::ALL.iter().skip(1) {
            assert!(record.is_empty(*field), "{} should be empty", field.key());
        }
        assert!(record.raw_text.is_empty());
    }

    #[test]
    fn test_parse_is_deterministic() {
        let text = "N° PLACA: ABC-123\nMARCA: KIA MODELO: RIO\nSEDE: LIMA\nPROPIETARIO(S):\nJUAN PEREZ";
        assert_eq!(
            FieldExtractor::parse(text, "ABC-123"),
            FieldExtractor::parse(text, "ABC-123")
        );
    }

    #[test]
    fn test_pattern_value_wins_over_line_scan() {
        // Line scan alone would take "TOYOTA MODELO: COROLLA" for marca
        let record = FieldExtractor::parse("MARCA: TOYOTA MODELO: COROLLA", "ABC-123");
        assert_eq!(record.marca, "TOYOTA");
        assert_eq!(record.modelo, "COROLLA");
    }

    #[test]
    fn test_ordinal_labels_and_lowercase_input() {
        let text = "n° serie: 9bwzzz377vt004251\nNº VIN: 8AJFB3CD1K1234567\nN°MOTOR:1NZ1234567\nmarca: nissan";
        let record = FieldExtractor::parse(text, "ABC-123");
        assert_eq!(record.n_serie, "9BWZZZ377VT004251");
        assert_eq!(record.n_vin, "8AJFB3CD1K1234567");
        assert_eq!(record.n_motor, "1NZ1234567");
        assert_eq!(record.marca, "NISSAN");
    }

    #[test]
    fn test_current_and_previous_plates_are_not_the_plate() {
        let text = "PLACA VIGENTE: ABC-123\nPLACA ANTERIOR: NINGUNA";
        let record = FieldExtractor::parse(text, "FROM-FILE");
        assert_eq!(record.placa_vigente, "ABC-123");
        assert_eq!(record.placa_anterior, "NINGUNA");
        assert_eq!(record.placa, "FROM-FILE");
    }

    #[test]
    fn test_model_year_is_not_the_model() {
        let text = "AÑO DE MODELO: 2015\nMODELO: YARIS";
        let record = FieldExtractor::parse(text, "ABC-123");
        assert_eq!(record.anio_modelo, "2015");
        assert_eq!(record.modelo, "YARIS");

        let record = FieldExtractor::parse("ANO MODELO 2019", "ABC-123");
        assert_eq!(record.anio_modelo, "2019");
    }

    #[test]
    fn test_model_year_from_line_scan() {
        // Label order the whole-text rules do not cover
        let record = FieldExtractor::parse("MODELO AÑO: 2018", "ABC-123");
        assert_eq!(record.anio_modelo, "2018");
    }

    #[test]
    fn test_model_year_line_with_accented_values() {
        let record = FieldExtractor::parse("AÑO MODELO: sedán", "ABC-123");
        assert_eq!(record.anio_modelo, "");
        assert_eq!(record.placa, "ABC-123");

        let record = FieldExtractor::parse("AÑO MODELO: ÑAÑU 2017", "ABC-123");
        assert_eq!(record.anio_modelo, "2017");

        assert_eq!(first_year("SEDÁN"), None);
        assert_eq!(first_year("Ñ 1998X"), Some("1998".to_string()));
    }

    #[test]
    fn test_phrase_spanning_words_on_one_line() {
        let text = "ESTADO: EN CIRCULACION\nCOLOR: GRIS PLATA\nSEDE: LIMA";
        let record = FieldExtractor::parse(text, "ABC-123");
        assert_eq!(record.estado, "EN CIRCULACION");
        assert_eq!(record.color, "GRIS PLATA");
        assert_eq!(record.sede, "LIMA");
    }

    #[test]
    fn test_line_scan_fills_what_patterns_miss() {
        // Digits stop the letters-only phrase, so only the line scan finds these
        let text = "SEDE LIMA 2\nANOTACIONES:\nNINGUNA 1";
        let record = FieldExtractor::parse(text, "ABC-123");
        assert_eq!(record.sede, "LIMA 2");
        assert_eq!(record.anotaciones, "NINGUNA 1");
    }

    #[test]
    fn test_serial_line_needs_number_prefix() {
        // A leading dash keeps the whole-text rule from matching
        let record = FieldExtractor::parse("NRO. DE SERIE: -9BW01", "ABC-123");
        assert_eq!(record.n_serie, "-9BW01");

        let record = FieldExtractor::parse("CODIGO SERIE: -9BW01", "ABC-123");
        assert_eq!(record.n_serie, "");
    }

    #[test]
    fn test_owner_accumulation_on_line_scan() {
        let text = "PROPIETARIO\nJUAN PEREZ\nROSA DIAZ\nESTADO: ACTIVO";
        let record = FieldExtractor::parse(text, "ABC-123");
        assert_eq!(record.propietarios, "JUAN PEREZ ROSA DIAZ");
        assert_eq!(record.estado, "ACTIVO");
    }

    #[test]
    fn test_placeholder_plate_is_replaced() {
        let mut record = VehicleRecord {
            placa: "N/A".to_string(),
            ..Default::default()
        };
        FieldExtractor::apply_fallback_plate(&mut record, "ABC-123");
        assert_eq!(record.placa, "ABC-123");

        let mut record = VehicleRecord {
            placa: "XYZ-789".to_string(),
            ..Default::default()
        };
        FieldExtractor::apply_fallback_plate(&mut record, "ABC-123");
        assert_eq!(record.placa, "XYZ-789");
    }

    #[test]
    fn test_word_helpers() {
        assert_eq!(word_tokens("N°PLACA: ABC-123"), vec!["N", "PLACA", "ABC", "123"]);
        assert_eq!(word_tokens("NºVIN:X"), vec!["N", "VIN", "X"]);
        assert_eq!(find_word("PLACAS PLACA: X", "PLACA"), Some((7, 12)));
        assert_eq!(find_word("VINO", "VIN"), None);
        assert_eq!(chunk_end("PROPIETARIO(S): JUAN", 11), 14);
    }
}
