use chrono::NaiveDate;

/// Where a dated record falls relative to a recalculation cutoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CutoffSide {
    Before,
    OnOrAfter,
}

/// The boundary of a replay. The cutoff date itself belongs to the forward
/// side: anything dated on `from` is torn down and replayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cutoff {
    from: NaiveDate,
}

impl Cutoff {
    pub fn new(from: NaiveDate) -> Self {
        Self { from }
    }

    pub fn date(&self) -> NaiveDate {
        self.from
    }

    pub fn side(&self, date: NaiveDate) -> CutoffSide {
        if date < self.from {
            CutoffSide::Before
        } else {
            CutoffSide::OnOrAfter
        }
    }

    pub fn is_before(&self, date: NaiveDate) -> bool {
        self.side(date) == CutoffSide::Before
    }

    pub fn is_forward(&self, date: NaiveDate) -> bool {
        self.side(date) == CutoffSide::OnOrAfter
    }
}
