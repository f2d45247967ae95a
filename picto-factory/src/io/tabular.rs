//! Delimited tabular codec: tab- or comma-separated, RFC4180 quoting

use super::{clean_cell, ImportRecord};
use crate::pipeline::row::{NluField, Row};

/// Keywords that mark the first record as a header when its first cell
/// contains one, case-insensitively.
const HEADER_KEYWORDS: [&str; 6] = ["id", "utterance", "nlu", "visual", "prompt", "svg"];

const EXPORT_HEADER: [&str; 6] = ["id", "utterance", "nlu", "visual_blocks", "prompt", "svg"];

/// Tab wins when the first line carries one, otherwise comma.
pub fn sniff_delimiter(text: &str) -> char {
    match text.lines().next() {
        Some(line) if line.contains('\t') => '\t',
        _ => ',',
    }
}

/// Parse delimited text into raw records. Doubled quotes escape a
/// literal quote inside a quoted field; newlines inside quotes belong to
/// the field; a lone carriage return is dropped.
pub fn parse(text: &str, delimiter: char) -> Vec<Vec<String>> {
    let mut records: Vec<Vec<String>> = Vec::new();
    let mut record: Vec<String> = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;

    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if in_quotes {
            if c == '"' {
                if chars.peek() == Some(&'"') {
                    field.push('"');
                    chars.next();
                } else {
                    in_quotes = false;
                }
            } else {
                field.push(c);
            }
        } else if c == '"' {
            in_quotes = true;
        } else if c == delimiter {
            record.push(std::mem::take(&mut field));
        } else if c == '\n' {
            record.push(std::mem::take(&mut field));
            records.push(std::mem::take(&mut record));
        } else if c == '\r' {
            if chars.peek() == Some(&'\n') {
                chars.next();
                record.push(std::mem::take(&mut field));
                records.push(std::mem::take(&mut record));
            }
        } else {
            field.push(c);
        }
    }
    if !field.is_empty() || !record.is_empty() {
        record.push(field);
        records.push(record);
    }
    records
}

struct ColumnMap {
    id: Option<usize>,
    utterance: Option<usize>,
    nlu: Option<usize>,
    visual: Option<usize>,
    prompt: Option<usize>,
    svg: Option<usize>,
}

impl ColumnMap {
    fn positional() -> Self {
        ColumnMap {
            id: Some(0),
            utterance: Some(1),
            nlu: Some(2),
            visual: Some(3),
            prompt: Some(4),
            svg: Some(5),
        }
    }

    fn from_header(header: &[String]) -> Self {
        let exact = |needle: &str| {
            header
                .iter()
                .position(|h| h.trim().eq_ignore_ascii_case(needle))
        };
        let contains = |needle: &str| {
            header
                .iter()
                .position(|h| h.trim().to_lowercase().contains(needle))
        };
        ColumnMap {
            id: exact("id"),
            utterance: contains("utterance"),
            nlu: exact("nlu"),
            visual: contains("visual"),
            prompt: contains("prompt"),
            svg: exact("svg"),
        }
    }
}

fn is_header(record: &[String]) -> bool {
    record
        .first()
        .map(|cell| {
            let cell = cell.trim().to_lowercase();
            HEADER_KEYWORDS.iter().any(|keyword| cell.contains(keyword))
        })
        .unwrap_or(false)
}

/// Import delimited text into records, sniffing the delimiter and
/// skipping a leading header record when one is present.
pub fn import(text: &str) -> Vec<ImportRecord> {
    let delimiter = sniff_delimiter(text);
    let parsed = parse(text, delimiter);
    if parsed.is_empty() {
        return Vec::new();
    }
    let (map, data) = if is_header(&parsed[0]) {
        (ColumnMap::from_header(&parsed[0]), &parsed[1..])
    } else {
        (ColumnMap::positional(), &parsed[..])
    };
    data.iter().map(|record| to_record(record, &map)).collect()
}

fn to_record(record: &[String], map: &ColumnMap) -> ImportRecord {
    let cell = |index: Option<usize>| {
        index
            .and_then(|i| record.get(i))
            .and_then(|raw| clean_cell(raw))
    };
    ImportRecord {
        id: cell(map.id),
        utterance: cell(map.utterance).unwrap_or_default(),
        nlu: cell(map.nlu).map(|raw| NluField::parse(&raw)),
        visual_blocks: cell(map.visual),
        prompt: cell(map.prompt),
        svg: cell(map.svg),
    }
}

/// Export rows as delimited text with a header record. Fields containing
/// the delimiter, a quote or a newline are quoted, with embedded quotes
/// doubled; absent fields export as empty cells.
pub fn export(rows: &[Row], delimiter: char) -> String {
    let sep = delimiter.to_string();
    let mut out = EXPORT_HEADER.join(&sep);
    out.push('\n');
    for row in rows {
        let nlu = row.nlu.as_ref().map(NluField::to_json_text).unwrap_or_default();
        let cells = [
            row.id.as_str(),
            row.utterance.as_str(),
            nlu.as_str(),
            row.visual_blocks.as_deref().unwrap_or(""),
            row.prompt.as_deref().unwrap_or(""),
            row.svg.as_deref().unwrap_or(""),
        ];
        let line: Vec<String> = cells
            .iter()
            .map(|cell| quote_field(cell, delimiter))
            .collect();
        out.push_str(&line.join(&sep));
        out.push('\n');
    }
    out
}

fn quote_field(value: &str, delimiter: char) -> String {
    if value.contains(delimiter) || value.contains('"') || value.contains('\n') || value.contains('\r')
    {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::store::PipelineStore;
    use crate::pipeline::test_support::sample_nlu;
    use picto_factory_sdk::NluData;

    #[test]
    fn parses_quoted_fields_with_embedded_quirks() {
        let text = "a,\"b,with comma\",\"say \"\"hi\"\"\",\"two\nlines\"\n";
        let records = parse(text, ',');
        assert_eq!(records.len(), 1);
        assert_eq!(
            records[0],
            vec!["a", "b,with comma", "say \"hi\"", "two\nlines"]
        );
    }

    #[test]
    fn lone_carriage_returns_are_dropped() {
        let records = parse("a,b\r\nc,d\ne\rf,g\n", ',');
        assert_eq!(records, vec![vec!["a", "b"], vec!["c", "d"], vec!["ef", "g"]]);
    }

    #[test]
    fn sniffs_tab_before_comma() {
        assert_eq!(sniff_delimiter("id\tutterance\n"), '\t');
        assert_eq!(sniff_delimiter("id,utterance\n"), ',');
    }

    #[test]
    fn header_record_is_skipped_case_insensitively() {
        let records = import("ID,Utterance,NLU,Visual Blocks,Prompt,SVG\n1,hola,,,,\n");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].utterance, "hola");
        assert_eq!(records[0].id.as_deref(), Some("1"));
    }

    #[test]
    fn headerless_input_maps_positionally() {
        let records = import("1,hola,{empty},actor,flat scene,{empty}\n");
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.utterance, "hola");
        assert_eq!(record.visual_blocks.as_deref(), Some("actor"));
        assert!(record.svg.is_none());
    }

    #[test]
    fn placeholder_cells_import_as_absent_and_idle() {
        let text = "id,utterance,nlu,visual_blocks,prompt,svg\n1,hola,{empty},{empty},{empty},{empty}\n";
        let records = import(text);
        let record = &records[0];
        assert!(record.nlu.is_none());
        assert!(record.visual_blocks.is_none());
        assert!(record.prompt.is_none());
        assert!(record.svg.is_none());

        let mut store = PipelineStore::new();
        let result = store.import_rows(records);
        let row = &result.rows[0];
        assert_eq!(row.nlu_status, picto_factory_sdk::StepStatus::Idle);
        assert_eq!(row.visual_status, picto_factory_sdk::StepStatus::Idle);
        assert_eq!(row.svg_status, picto_factory_sdk::StepStatus::Idle);
    }

    #[test]
    fn malformed_nlu_cells_do_not_abort_the_import() {
        let text = "id,utterance,nlu\n1,hola,\"{broken json\"\n2,adios,\n";
        let records = import(text);
        assert_eq!(records.len(), 2);
        assert_eq!(
            records[0].nlu,
            Some(NluField::Unparsed("{broken json".to_string()))
        );
        assert!(records[1].nlu.is_none());
    }

    #[test]
    fn export_quotes_only_what_needs_quoting() {
        let mut row = Row::with_id("1", "hola, mundo");
        row.prompt = Some("line one\nline two".to_string());
        row.svg = Some("<svg class=\"f\"/>".to_string());
        let out = export(&[row], ',');
        let mut lines = out.lines();
        assert_eq!(lines.next().unwrap(), "id,utterance,nlu,visual_blocks,prompt,svg");
        let data = &out[out.find('\n').unwrap() + 1..];
        assert!(data.starts_with("1,\"hola, mundo\","));
        assert!(data.contains("\"line one\nline two\""));
        assert!(data.contains("\"<svg class=\"\"f\"\"/>\""));
    }

    #[test]
    fn export_import_round_trip_preserves_fields_present() {
        let mut store = PipelineStore::new();
        let mut rich = Row::with_id("7", "Quiero beber agua");
        rich.nlu = Some(NluField::Structured(sample_nlu("Quiero beber agua")));
        rich.visual_blocks = Some("actor,object".to_string());
        rich.prompt = Some("flat, centered".to_string());
        rich.svg = Some("<svg viewBox=\"0 0 100 100\"/>".to_string());
        let bare = Row::with_id("8", "hola");
        store.import_rows(import(&export(&[rich.clone(), bare.clone()], ',')));

        assert_eq!(store.len(), 2);
        let restored = store.get("7").unwrap();
        assert_eq!(restored.utterance, rich.utterance);
        assert!(matches!(restored.nlu, Some(NluField::Structured(_))));
        assert_eq!(restored.visual_blocks, rich.visual_blocks);
        assert_eq!(restored.prompt, rich.prompt);
        assert_eq!(restored.svg, rich.svg);

        let restored_nlu: &NluData = restored.nlu.as_ref().unwrap().as_structured().unwrap();
        assert_eq!(restored_nlu.utterance, "Quiero beber agua");

        let restored_bare = store.get("8").unwrap();
        assert_eq!(restored_bare.utterance, "hola");
        assert!(restored_bare.nlu.is_none());
        assert!(restored_bare.visual_blocks.is_none());
        assert!(restored_bare.svg.is_none());
    }

    #[test]
    fn tab_separated_round_trip() {
        let mut row = Row::with_id("1", "hola");
        row.prompt = Some("uses\ttabs".to_string());
        let records = import(&export(&[row], '\t'));
        assert_eq!(records[0].prompt.as_deref(), Some("uses\ttabs"));
    }
}
