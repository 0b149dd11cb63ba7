/// Postback sequencing for the flight board form
use crate::clients::PageTransport;
use crate::domain::{Direction, FormRequest, PageResult, TimeWindow, ViewState};
use crate::errors::{ScrapeError, ScrapeResultOf};
use crate::parser::{self, ParsedPage, EVENT_VALIDATION, VIEWSTATE, VIEWSTATE_GENERATOR};
use std::collections::BTreeMap;
use tracing::{debug, info};

pub const EVENT_TARGET: &str = "__EVENTTARGET";
pub const EVENT_ARGUMENT: &str = "__EVENTARGUMENT";
pub const MOVEMENT_TYPE: &str = "ddlMovTp";
pub const AIRPORT: &str = "ddlAeropuerto";
pub const SECTOR: &str = "ddlSector";
pub const AIRLINE: &str = "ddlAerolinea";
pub const LANDED: &str = "ddlAterrizados";
pub const TIME_WINDOW: &str = "ddlVentanaH";
pub const SEARCH_BUTTON: &str = "btnBuscar";

const SEARCH_LABEL: &str = "Buscar";
const ANY: &str = "-1";
const ALL_LANDED: &str = "TODOS";

/// Current selections of every filter on the form.
///
/// All of them go out with every postback; a missing one resets to the
/// server default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filters {
    pub direction: Direction,
    pub airport: String,
    pub sector: String,
    pub airline: String,
    pub landed: String,
    pub window: TimeWindow,
}

impl Filters {
    /// The selections the page starts with: arrivals, every sector and airline
    pub fn initial(airport: &str, window: TimeWindow) -> Self {
        Self {
            direction: Direction::Arrival,
            airport: airport.to_string(),
            sector: ANY.to_string(),
            airline: ANY.to_string(),
            landed: ALL_LANDED.to_string(),
            window,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavState {
    Start,
    DirectionSelected(Direction),
    WindowSelected(Direction, TimeWindow),
    /// Last page number fetched
    Paginated(Direction, TimeWindow, usize),
}

/// Assemble one postback body
pub fn build_form(
    filters: &Filters,
    view_state: &ViewState,
    event_target: &str,
    search: bool,
) -> FormRequest {
    let mut form = FormRequest::default();
    form.push(EVENT_TARGET, event_target);
    form.push(EVENT_ARGUMENT, "");
    form.push(MOVEMENT_TYPE, filters.direction.form_code());
    form.push(AIRPORT, filters.airport.as_str());
    form.push(SECTOR, filters.sector.as_str());
    form.push(AIRLINE, filters.airline.as_str());
    form.push(LANDED, filters.landed.as_str());
    form.push(TIME_WINDOW, filters.window.form_value());
    if search {
        form.push(SEARCH_BUTTON, SEARCH_LABEL);
    }
    form.push(VIEWSTATE, view_state.payload.as_str());
    form.push(VIEWSTATE_GENERATOR, view_state.generator.as_str());
    form.push(EVENT_VALIDATION, view_state.validation.as_str());
    form
}

/// Drives one server session through the form's states.
///
/// Every transition consumes the view state of the previous response. After
/// a failed transition the navigator drops its view state and has to be
/// reloaded, the server will not accept the old token again.
pub struct FormNavigator<T> {
    transport: T,
    filters: Filters,
    view_state: Option<ViewState>,
    state: NavState,
}

impl<T: PageTransport> FormNavigator<T> {
    pub fn new(transport: T, filters: Filters) -> Self {
        Self {
            transport,
            filters,
            view_state: None,
            state: NavState::Start,
        }
    }

    #[cfg(test)]
    pub fn state(&self) -> NavState {
        self.state
    }

    /// GET the page, then search again if the server opened on other selections.
    ///
    /// The returned grid always reflects `filters`, never the server defaults.
    pub async fn load(&mut self) -> ScrapeResultOf<PageResult> {
        info!("Loading initial page");
        let result = self.load_with_filters().await;
        let next = NavState::WindowSelected(self.filters.direction, self.filters.window);
        self.settle(result, next)
    }

    async fn load_with_filters(&mut self) -> ScrapeResultOf<PageResult> {
        let body = self.transport.fetch_initial().await?;
        let parsed = parser::parse_response(&body, self.filters.direction)?;
        let mismatched = self.mismatched_control(&parsed.selections);
        let page = self.keep(parsed);

        match mismatched {
            None => Ok(page),
            Some(control) => {
                info!("Server opened with a different {} - applying filters", control);
                self.switch_and_search(control).await
            }
        }
    }

    /// First dropdown whose server-side selection differs from `filters`
    fn mismatched_control(&self, selections: &BTreeMap<String, String>) -> Option<&'static str> {
        let wanted = [
            (MOVEMENT_TYPE, self.filters.direction.form_code().to_string()),
            (AIRPORT, self.filters.airport.clone()),
            (TIME_WINDOW, self.filters.window.form_value()),
        ];
        wanted
            .into_iter()
            .find(|(control, value)| selections.get(*control) != Some(value))
            .map(|(control, _)| control)
    }

    /// Switch the movement-type dropdown, then search
    pub async fn select_direction(&mut self, direction: Direction) -> ScrapeResultOf<PageResult> {
        info!("Switching to {}", direction);
        self.filters.direction = direction;
        let result = self.switch_and_search(MOVEMENT_TYPE).await;
        self.settle(result, NavState::DirectionSelected(direction))
    }

    /// Switch the time-window dropdown (for `direction`), then search
    pub async fn select_time_window(
        &mut self,
        direction: Direction,
        window: TimeWindow,
    ) -> ScrapeResultOf<PageResult> {
        info!("Switching time window to {} for {}", window, direction);
        self.filters.direction = direction;
        self.filters.window = window;
        let result = self.switch_and_search(TIME_WINDOW).await;
        self.settle(result, NavState::WindowSelected(direction, window))
    }

    /// Follow one pager target. No search marker: it would restart the query.
    pub async fn paginate(&mut self, target: &str) -> ScrapeResultOf<PageResult> {
        let (direction, window, current) = match self.state {
            NavState::Start => {
                return Err(ScrapeError::Protocol(
                    "cannot paginate before a result grid was loaded".to_string(),
                ))
            }
            NavState::DirectionSelected(d) => (d, self.filters.window, 1),
            NavState::WindowSelected(d, w) => (d, w, 1),
            NavState::Paginated(d, w, page) => (d, w, page),
        };
        debug!("Following pager target {}", target);

        let result = match self.form(target, false) {
            Ok(form) => match self.transport.post_form(&form).await {
                Ok(body) => self.absorb(&body),
                Err(e) => Err(e),
            },
            Err(e) => Err(e),
        };
        self.settle(result, NavState::Paginated(direction, window, current + 1))
    }

    /// Two postbacks: the dropdown change, then the search with fresh view state
    async fn switch_and_search(&mut self, control: &str) -> ScrapeResultOf<PageResult> {
        let switch = self.form(control, false)?;
        let body = self.transport.post_form(&switch).await?;
        self.view_state = Some(parser::parse_view_state(&body)?);

        let search = self.form("", true)?;
        let body = self.transport.post_form(&search).await?;
        self.absorb(&body)
    }

    fn absorb(&mut self, body: &str) -> ScrapeResultOf<PageResult> {
        let parsed = parser::parse_response(body, self.filters.direction)?;
        Ok(self.keep(parsed))
    }

    fn keep(&mut self, parsed: ParsedPage) -> PageResult {
        self.view_state = Some(parsed.view_state);
        debug!(
            "Grid {}: {} record(s), {} pager target(s)",
            self.filters.direction.grid_id(),
            parsed.page.records.len(),
            parsed.page.pager_targets.len()
        );
        parsed.page
    }

    fn form(&self, event_target: &str, search: bool) -> ScrapeResultOf<FormRequest> {
        let view_state = self.view_state.as_ref().ok_or_else(|| {
            ScrapeError::Protocol("no view state held; the page must be loaded first".to_string())
        })?;
        Ok(build_form(&self.filters, view_state, event_target, search))
    }

    fn settle(
        &mut self,
        result: ScrapeResultOf<PageResult>,
        next: NavState,
    ) -> ScrapeResultOf<PageResult> {
        match result {
            Ok(page) => {
                self.state = next;
                Ok(page)
            }
            Err(e) => {
                self.view_state = None;
                self.state = NavState::Start;
                Err(e)
            }
        }
    }
}
