/// HTML parsing for the flight board page: hidden protocol fields and result grids
use crate::domain::{Direction, FlightRecord, PageResult, ViewState};
use crate::errors::{ScrapeError, ScrapeResultOf};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::sync::OnceLock;
use tracing::debug;

#[cfg(test)]
pub(crate) mod fixtures;

pub const VIEWSTATE: &str = "__VIEWSTATE";
pub const VIEWSTATE_GENERATOR: &str = "__VIEWSTATEGENERATOR";
pub const EVENT_VALIDATION: &str = "__EVENTVALIDATION";

const POSTBACK_PATTERN: &str = r"__doPostBack\('([^']+)'";

/// Selectors and patterns shared by every parse, compiled on first use
struct Patterns {
    viewstate: Selector,
    viewstate_generator: Selector,
    event_validation: Selector,
    arrivals_grid: Selector,
    departures_grid: Selector,
    row: Selector,
    anchor: Selector,
    dropdown: Selector,
    option: Selector,
    postback: Regex,
}

impl Patterns {
    fn compile() -> ScrapeResultOf<Self> {
        Ok(Self {
            viewstate: hidden_selector(VIEWSTATE)?,
            viewstate_generator: hidden_selector(VIEWSTATE_GENERATOR)?,
            event_validation: hidden_selector(EVENT_VALIDATION)?,
            arrivals_grid: selector(&format!("table#{}", Direction::Arrival.grid_id()))?,
            departures_grid: selector(&format!("table#{}", Direction::Departure.grid_id()))?,
            row: selector("tr")?,
            anchor: selector("a[href]")?,
            dropdown: selector("select[name]")?,
            option: selector("option")?,
            postback: Regex::new(POSTBACK_PATTERN)
                .map_err(|e| ScrapeError::Protocol(format!("invalid postback pattern: {}", e)))?,
        })
    }

    fn grid(&self, direction: Direction) -> &Selector {
        match direction {
            Direction::Arrival => &self.arrivals_grid,
            Direction::Departure => &self.departures_grid,
        }
    }
}

fn patterns() -> ScrapeResultOf<&'static Patterns> {
    static PATTERNS: OnceLock<Result<Patterns, String>> = OnceLock::new();
    PATTERNS
        .get_or_init(|| Patterns::compile().map_err(|e| e.to_string()))
        .as_ref()
        .map_err(|e| ScrapeError::Protocol(e.clone()))
}

/// View state, dropdown selections and grid contents of one response
#[derive(Debug, Clone)]
pub struct ParsedPage {
    pub view_state: ViewState,
    /// Value the server shows selected in each named dropdown
    pub selections: BTreeMap<String, String>,
    pub page: PageResult,
}

/// Parse a full response: view state is mandatory, the grid is not.
///
/// The parsed document never outlives this call, so callers can hold the
/// result across `.await` points.
pub fn parse_response(body: &str, direction: Direction) -> ScrapeResultOf<ParsedPage> {
    let document = Html::parse_document(body);
    let view_state = extract_view_state(&document)?;
    let selections = selected_values(&document)?;
    let page = parse_grid(&document, direction)?;
    Ok(ParsedPage {
        view_state,
        selections,
        page,
    })
}

/// Parse only the hidden fields of a response
pub fn parse_view_state(body: &str) -> ScrapeResultOf<ViewState> {
    extract_view_state(&Html::parse_document(body))
}

/// Read the three hidden protocol fields; all must be present and non-empty
pub fn extract_view_state(document: &Html) -> ScrapeResultOf<ViewState> {
    let patterns = patterns()?;
    Ok(ViewState {
        generator: hidden_field(document, &patterns.viewstate_generator, VIEWSTATE_GENERATOR)?,
        payload: hidden_field(document, &patterns.viewstate, VIEWSTATE)?,
        validation: hidden_field(document, &patterns.event_validation, EVENT_VALIDATION)?,
    })
}

fn hidden_selector(name: &str) -> ScrapeResultOf<Selector> {
    selector(&format!(r#"input[name="{name}"], input#{name}"#))
}

fn hidden_field(document: &Html, sel: &Selector, name: &str) -> ScrapeResultOf<String> {
    document
        .select(sel)
        .filter_map(|input| input.value().attr("value"))
        .find(|value| !value.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ScrapeError::Protocol(format!("hidden field {} missing or empty", name)))
}

/// Current value of every named dropdown.
///
/// An option marked `selected` wins; otherwise the first option, as a browser would submit it.
pub fn selected_values(document: &Html) -> ScrapeResultOf<BTreeMap<String, String>> {
    let patterns = patterns()?;
    let mut values = BTreeMap::new();
    for dropdown in document.select(&patterns.dropdown) {
        let Some(name) = dropdown.value().attr("name") else {
            continue;
        };
        let options: Vec<ElementRef<'_>> = dropdown.select(&patterns.option).collect();
        let chosen = options
            .iter()
            .find(|option| option.value().attr("selected").is_some())
            .or_else(|| options.first());
        if let Some(option) = chosen {
            let value = option
                .value()
                .attr("value")
                .map(str::to_string)
                .unwrap_or_else(|| cell_text(*option));
            values.insert(name.to_string(), value);
        }
    }
    Ok(values)
}

/// Convert the direction's results grid into records.
///
/// A missing grid is a legitimate empty board, not an error. Columns are
/// mapped from the header row of this same document.
pub fn parse_grid(document: &Html, direction: Direction) -> ScrapeResultOf<PageResult> {
    let patterns = patterns()?;
    let Some(table) = document.select(patterns.grid(direction)).next() else {
        debug!("Grid {} not present", direction.grid_id());
        return Ok(PageResult::default());
    };

    let rows = own_rows(table, &patterns.row);
    let Some((header_row, body_rows)) = rows.split_first() else {
        return Ok(PageResult::default());
    };

    let columns: Vec<String> = cells(*header_row, &["th", "td"])
        .iter()
        .enumerate()
        .map(|(idx, cell)| {
            let key = canonical_header(&cell_text(*cell));
            if key.is_empty() {
                format!("col{}", idx)
            } else {
                key
            }
        })
        .collect();

    let mut result = PageResult::default();
    for row in body_rows {
        let tds = cells(*row, &["td"]);

        if is_pager_row(*row, &tds) {
            result.pager_targets.extend(pager_targets(*row, patterns));
            continue;
        }

        if tds.is_empty() || tds.len() < columns.len() {
            continue;
        }

        let mut record = FlightRecord::new(direction);
        for (key, cell) in columns.iter().zip(tds.iter()) {
            assign(&mut record, key, cell_text(*cell));
        }
        result.records.push(record);
    }

    Ok(result)
}

/// Rows belonging to this table, not to tables nested inside it
fn own_rows<'a>(table: ElementRef<'a>, tr: &Selector) -> Vec<ElementRef<'a>> {
    table
        .select(tr)
        .filter(|row| {
            row.ancestors()
                .find(|node| {
                    node.value()
                        .as_element()
                        .is_some_and(|el| el.name() == "table")
                })
                .is_some_and(|node| node.id() == table.id())
        })
        .collect()
}

fn cells<'a>(row: ElementRef<'a>, names: &[&str]) -> Vec<ElementRef<'a>> {
    row.children()
        .filter_map(ElementRef::wrap)
        .filter(|cell| names.contains(&cell.value().name()))
        .collect()
}

fn is_pager_row(row: ElementRef<'_>, tds: &[ElementRef<'_>]) -> bool {
    let marked = row
        .value()
        .classes()
        .any(|class| class.eq_ignore_ascii_case("pager"));
    let spanning = tds.len() == 1 && tds[0].value().attr("colspan").is_some();
    marked || spanning
}

fn pager_targets(row: ElementRef<'_>, patterns: &Patterns) -> Vec<String> {
    row.select(&patterns.anchor)
        .filter_map(|a| a.value().attr("href"))
        .filter_map(|href| patterns.postback.captures(href))
        .filter_map(|caps| caps.get(1).map(|m| m.as_str().to_string()))
        .collect()
}

fn cell_text(cell: ElementRef<'_>) -> String {
    cell.text()
        .collect::<String>()
        .replace('\u{a0}', " ")
        .trim()
        .to_string()
}

fn assign(record: &mut FlightRecord, key: &str, value: String) {
    match key {
        "cia" | "compania" | "aerolinea" => record.airline = value,
        "vuelo" => record.number = value,
        "origen" | "destino" => record.location = value,
        "sta" | "std" => record.scheduled = value,
        "eta" | "etd" => record.estimated = value,
        "ata" | "atd" => record.actual = value,
        "matricula" => record.registration = value,
        "posicion" => record.position = value,
        "cinta" | "puerta" => record.gate_or_belt = value,
        "remark" | "estado" => record.remark = value,
        _ => {
            record.extra.insert(key.to_string(), value);
        }
    }
}

/// Canonical column key: mojibake repaired, accents folded, lowercase, letters and digits only.
///
/// `Cía.`, `CÃ\u{ad}a.` and `Cia` all become `cia`.
pub fn canonical_header(raw: &str) -> String {
    repair_mojibake(raw.trim())
        .chars()
        .flat_map(char::to_lowercase)
        .filter_map(fold_accent)
        .collect()
}

/// Undo UTF-8 bytes that were decoded as Latin-1
fn repair_mojibake(text: &str) -> Cow<'_, str> {
    if !text.contains(['Ã', 'Â']) {
        return Cow::Borrowed(text);
    }
    let bytes: Option<Vec<u8>> = text.chars().map(|c| u8::try_from(u32::from(c)).ok()).collect();
    match bytes.and_then(|b| String::from_utf8(b).ok()) {
        Some(fixed) => Cow::Owned(fixed),
        None => Cow::Borrowed(text),
    }
}

fn fold_accent(c: char) -> Option<char> {
    let folded = match c {
        'á' | 'à' | 'ä' | 'â' | 'ã' => 'a',
        'é' | 'è' | 'ë' | 'ê' => 'e',
        'í' | 'ì' | 'ï' | 'î' => 'i',
        'ó' | 'ò' | 'ö' | 'ô' | 'õ' => 'o',
        'ú' | 'ù' | 'ü' | 'û' => 'u',
        'ñ' => 'n',
        'ç' => 'c',
        other => other,
    };
    folded.is_ascii_alphanumeric().then_some(folded)
}

fn selector(css: &str) -> ScrapeResultOf<Selector> {
    Selector::parse(css).map_err(|e| ScrapeError::Protocol(format!("invalid selector '{}': {}", css, e)))
}
