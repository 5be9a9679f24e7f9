use crate::Severity;

/// Canonical packet-search query shared by the form and the severity chips.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PacketQuery {
    pub threat: String,
    pub severity: String,
    pub source: String,
    pub target: String,
    pub layer: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryField {
    Threat,
    Severity,
    Source,
    Target,
    Layer,
}

impl QueryField {
    pub const ALL: [QueryField; 5] = [
        QueryField::Threat,
        QueryField::Severity,
        QueryField::Source,
        QueryField::Target,
        QueryField::Layer,
    ];

    pub fn param(self) -> &'static str {
        match self {
            QueryField::Threat => "threat",
            QueryField::Severity => "severity",
            QueryField::Source => "source",
            QueryField::Target => "target",
            QueryField::Layer => "layer",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            QueryField::Threat => "Threat",
            QueryField::Severity => "Severity",
            QueryField::Source => "Source",
            QueryField::Target => "Target",
            QueryField::Layer => "Layer",
        }
    }

    fn next(self) -> Self {
        match self {
            QueryField::Threat => QueryField::Severity,
            QueryField::Severity => QueryField::Source,
            QueryField::Source => QueryField::Target,
            QueryField::Target => QueryField::Layer,
            QueryField::Layer => QueryField::Threat,
        }
    }

    fn prev(self) -> Self {
        match self {
            QueryField::Threat => QueryField::Layer,
            QueryField::Severity => QueryField::Threat,
            QueryField::Source => QueryField::Severity,
            QueryField::Target => QueryField::Source,
            QueryField::Layer => QueryField::Target,
        }
    }
}

impl PacketQuery {
    pub fn field(&self, field: QueryField) -> &str {
        match field {
            QueryField::Threat => &self.threat,
            QueryField::Severity => &self.severity,
            QueryField::Source => &self.source,
            QueryField::Target => &self.target,
            QueryField::Layer => &self.layer,
        }
    }

    fn field_mut(&mut self, field: QueryField) -> &mut String {
        match field {
            QueryField::Threat => &mut self.threat,
            QueryField::Severity => &mut self.severity,
            QueryField::Source => &mut self.source,
            QueryField::Target => &mut self.target,
            QueryField::Layer => &mut self.layer,
        }
    }

    /// Query-string pairs for the non-empty fields only, trimmed.
    pub fn to_pairs(&self) -> Vec<(&'static str, String)> {
        QueryField::ALL
            .iter()
            .filter_map(|field| {
                let value = self.field(*field).trim();
                if value.is_empty() {
                    None
                } else {
                    Some((field.param(), value.to_string()))
                }
            })
            .collect()
    }

    pub fn is_unfiltered(&self) -> bool {
        self.to_pairs().is_empty()
    }

    pub fn summary(&self) -> String {
        let pairs = self.to_pairs();
        if pairs.is_empty() {
            return "all packets".to_string();
        }
        pairs
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeverityChip {
    Only(Severity),
    Reset,
}

/// Form and chip state behind the packet table.
#[derive(Debug, Clone, Default)]
pub struct FilterState {
    form: PacketQuery,
    editing: Option<QueryField>,
    active_chip: Option<Severity>,
}

impl FilterState {
    pub fn form(&self) -> &PacketQuery {
        &self.form
    }

    pub fn editing(&self) -> Option<QueryField> {
        self.editing
    }

    pub fn active_chip(&self) -> Option<Severity> {
        self.active_chip
    }

    /// A chip click writes the form and submits it: one query per click.
    pub fn apply_chip(&mut self, chip: SeverityChip) -> PacketQuery {
        match chip {
            SeverityChip::Reset => {
                self.form = PacketQuery::default();
                self.active_chip = None;
                self.editing = None;
            }
            SeverityChip::Only(severity) => {
                self.form.severity = severity.source_label().to_string();
                self.active_chip = Some(severity);
            }
        }
        self.submit()
    }

    pub fn submit(&mut self) -> PacketQuery {
        self.editing = None;
        self.active_chip = Severity::ALL
            .into_iter()
            .find(|severity| self.form.severity.trim() == severity.source_label());
        self.form.clone()
    }

    pub fn begin_edit(&mut self) {
        if self.editing.is_none() {
            self.editing = Some(QueryField::Threat);
        }
    }

    pub fn cancel_edit(&mut self) {
        self.editing = None;
    }

    pub fn focus_next(&mut self) {
        self.editing = self.editing.map(QueryField::next);
    }

    pub fn focus_prev(&mut self) {
        self.editing = self.editing.map(QueryField::prev);
    }

    pub fn push_char(&mut self, ch: char) {
        if let Some(field) = self.editing {
            self.form.field_mut(field).push(ch);
        }
    }

    pub fn backspace(&mut self) {
        if let Some(field) = self.editing {
            self.form.field_mut(field).pop();
        }
    }
}
