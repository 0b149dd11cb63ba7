/// HTML builders for tests that need a flight board response
use crate::domain::Direction;

/// One grid row; unspecified columns get plausible values
pub struct Row {
    airline: String,
    number: String,
    position: String,
}

impl Row {
    pub fn new(airline: &str, number: &str) -> Self {
        Self {
            airline: airline.to_string(),
            number: number.to_string(),
            position: "01".to_string(),
        }
    }

    pub fn position(mut self, position: &str) -> Self {
        self.position = position.to_string();
        self
    }
}

fn hidden_fields(tag: &str) -> String {
    format!(
        r#"<input type="hidden" name="__VIEWSTATE" id="__VIEWSTATE" value="payload-{tag}" />
<input type="hidden" name="__VIEWSTATEGENERATOR" id="__VIEWSTATEGENERATOR" value="gen-{tag}" />
<input type="hidden" name="__EVENTVALIDATION" id="__EVENTVALIDATION" value="validation-{tag}" />"#
    )
}

/// Dropdowns as the server renders them on a fresh session: AEP, +6h
fn dropdowns(direction: Direction) -> String {
    let (arrivals, departures) = match direction {
        Direction::Arrival => (" selected=\"selected\"", ""),
        Direction::Departure => ("", " selected=\"selected\""),
    };
    format!(
        "<select name=\"ddlMovTp\"><option value=\"A\"{arrivals}>Arribos</option>\
         <option value=\"D\"{departures}>Partidas</option></select>\
         <select name=\"ddlAeropuerto\"><option value=\"AEP\" selected=\"selected\">Aeroparque</option>\
         <option value=\"EZE\">Ezeiza</option></select>\
         <select name=\"ddlVentanaH\"><option value=\"-1\">-1</option>\
         <option value=\"6\" selected=\"selected\">6</option><option value=\"12\">12</option></select>"
    )
}

/// A board page for `direction`, with view state tagged `tag`
pub fn board_page(direction: Direction, tag: &str, rows: &[Row], pager: &[&str]) -> String {
    let (place, sched, est, act, extra) = match direction {
        Direction::Arrival => ("Origen", "STA", "ETA", "ATA", "Cinta"),
        Direction::Departure => ("Destino", "STD", "ETD", "ATD", "Puerta"),
    };
    let mut grid = format!(
        "<tr class=\"Header\"><td>Cía.</td><td>Vuelo</td><td>{place}</td><td>{sched}</td>\
         <td>{est}</td><td>{act}</td><td>Matrícula</td><td>Posición</td><td>{extra}</td>\
         <td>Remark</td></tr>"
    );
    for row in rows {
        grid.push_str(&format!(
            "<tr><td>{}</td><td>{}</td><td>Cordoba</td><td>08|12 19:30</td><td>08|12 19:45</td>\
             <td></td><td>LV-FNA</td><td>{}</td><td>3</td><td>ARRIBADO</td></tr>",
            row.airline, row.number, row.position
        ));
    }
    if !pager.is_empty() {
        let links: String = pager
            .iter()
            .enumerate()
            .map(|(idx, target)| {
                format!(
                    "<a href=\"javascript:__doPostBack('{}','')\">{}</a>&nbsp;",
                    target,
                    idx + 2
                )
            })
            .collect();
        grid.push_str(&format!(
            "<tr class=\"Pager\"><td colspan=\"10\"><span>1</span>&nbsp;{links}</td></tr>"
        ));
    }

    format!(
        "<html><body><form method=\"post\" action=\"vuelos.aspx\">{}{}\
         <table id=\"{}\">{}</table></form></body></html>",
        hidden_fields(tag),
        dropdowns(direction),
        direction.grid_id(),
        grid
    )
}

/// A page with valid view state and a hand-written grid body
pub fn page_with_grid(grid_id: &str, rows_html: &str) -> String {
    format!(
        "<html><body><form>{}<table id=\"{}\">{}</table></form></body></html>",
        hidden_fields("grid"),
        grid_id,
        rows_html
    )
}
