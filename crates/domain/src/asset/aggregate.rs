//! Asset aggregate implementation.

use chrono::{DateTime, NaiveDate, Utc};
use common::AggregateId;
use serde::{Deserialize, Serialize};

use crate::aggregate::{Aggregate, AggregateRoot, EventSourced};
use crate::error::{InvariantCheck, InvariantViolation};

use super::{
    AssetEvent, AssetKind, Currency, Money, Valuation, rules,
    events::{AssetCreatedData, AssetDeletedData, AssetRenamedData, ValuationRecordedData},
};

/// Asset aggregate root.
///
/// A named holding (property, security, cash account...) denominated in one
/// currency, with an append-only valuation history. Deletion is logical: a
/// deleted asset still loads but rejects further changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Asset {
    root: AggregateRoot<AssetEvent>,
    name: String,
    kind: AssetKind,
    currency: Currency,
    valuations: Vec<Valuation>,
    deleted_at: Option<DateTime<Utc>>,
}

impl Aggregate for Asset {
    type Event = AssetEvent;

    fn aggregate_type() -> &'static str {
        "Asset"
    }

    fn root(&self) -> &AggregateRoot<AssetEvent> {
        &self.root
    }

    fn root_mut(&mut self) -> &mut AggregateRoot<AssetEvent> {
        &mut self.root
    }

    fn apply(&mut self, event: &AssetEvent) {
        match event {
            AssetEvent::AssetCreated(data) => {
                self.name = data.name.clone();
                self.kind = data.kind;
                self.currency = data.currency.clone();
            }
            AssetEvent::AssetRenamed(data) => self.name = data.name.clone(),
            AssetEvent::ValuationRecorded(data) => self.valuations.push(Valuation {
                amount: data.amount.clone(),
                as_of: data.as_of,
                recorded_at: data.recorded_at,
            }),
            AssetEvent::AssetDeleted(data) => self.deleted_at = Some(data.deleted_at),
        }
    }
}

impl EventSourced for Asset {
    fn blank(root: AggregateRoot<AssetEvent>) -> Self {
        Self {
            root,
            name: String::new(),
            kind: AssetKind::default(),
            currency: Currency::default(),
            valuations: Vec::new(),
            deleted_at: None,
        }
    }
}

// Command methods
impl Asset {
    /// Creates an asset, checking the name and currency together.
    pub fn create(
        id: AggregateId,
        name: &str,
        kind: AssetKind,
        currency_code: &str,
    ) -> Result<Self, InvariantViolation> {
        let mut check = InvariantCheck::new();
        check.ensure(
            !name.trim().is_empty(),
            rules::NAME_REQUIRED,
            "asset name is required",
        );
        let currency = check.finish_with(
            Currency::parse(currency_code),
            rules::CURRENCY_INVALID,
            format!("'{currency_code}' is not an ISO 4217 currency code"),
        )?;

        let mut asset = Self::blank(AggregateRoot::new(id.clone()));
        asset.raise(AssetEvent::AssetCreated(AssetCreatedData {
            asset_id: id.into(),
            name: name.trim().to_string(),
            kind,
            currency,
        }));
        Ok(asset)
    }

    /// Updates the asset's details. The currency is fixed at creation and
    /// must be restated unchanged.
    pub fn update_details(&mut self, name: &str, currency_code: &str) -> Result<(), InvariantViolation> {
        let name = name.trim();

        let mut check = InvariantCheck::new();
        self.check_not_deleted(&mut check);
        check.ensure(!name.is_empty(), rules::NAME_REQUIRED, "asset name is required");
        self.check_currency(&mut check, currency_code);
        check.finish()?;

        if name != self.name {
            self.raise(AssetEvent::AssetRenamed(AssetRenamedData {
                previous_name: self.name.clone(),
                name: name.to_string(),
            }));
        }
        Ok(())
    }

    /// Appends a valuation in the asset's own currency.
    pub fn record_valuation(
        &mut self,
        amount_minor: i64,
        currency_code: &str,
        as_of: NaiveDate,
        recorded_at: DateTime<Utc>,
    ) -> Result<(), InvariantViolation> {
        let mut check = InvariantCheck::new();
        self.check_not_deleted(&mut check);
        check
            .ensure(
                amount_minor >= 0,
                rules::AMOUNT_NEGATIVE,
                "valuation amount must not be negative",
            )
            .ensure(
                as_of <= recorded_at.date_naive(),
                rules::VALUATION_IN_FUTURE,
                format!("valuation date {as_of} is in the future"),
            );
        self.check_currency(&mut check, currency_code);
        check.finish()?;

        self.raise(AssetEvent::ValuationRecorded(ValuationRecordedData {
            amount: Money::new(amount_minor, self.currency.clone()),
            as_of,
            recorded_at,
        }));
        Ok(())
    }

    /// Marks the asset deleted.
    pub fn delete(&mut self, reason: Option<String>, at: DateTime<Utc>) -> Result<(), InvariantViolation> {
        let mut check = InvariantCheck::new();
        self.check_not_deleted(&mut check);
        check.finish()?;

        self.raise(AssetEvent::AssetDeleted(AssetDeletedData {
            deleted_at: at,
            reason,
        }));
        Ok(())
    }

    fn check_not_deleted(&self, check: &mut InvariantCheck) {
        check.ensure(
            self.deleted_at.is_none(),
            rules::ASSET_DELETED,
            format!("asset {} has been deleted", self.id()),
        );
    }

    fn check_currency(&self, check: &mut InvariantCheck, currency_code: &str) {
        check.ensure(
            currency_code.trim() == self.currency.as_str(),
            rules::CURRENCY_MISMATCH,
            format!(
                "asset is held in {}, got '{}'",
                self.currency,
                currency_code.trim()
            ),
        );
    }
}

// Query methods
impl Asset {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> AssetKind {
        self.kind
    }

    pub fn currency(&self) -> &Currency {
        &self.currency
    }

    pub fn valuations(&self) -> &[Valuation] {
        &self.valuations
    }

    /// The valuation with the latest `as_of` date; later entries win ties.
    pub fn latest_valuation(&self) -> Option<&Valuation> {
        self.valuations
            .iter()
            .enumerate()
            .max_by_key(|(i, v)| (v.as_of, *i))
            .map(|(_, v)| v)
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn deleted_at(&self) -> Option<DateTime<Utc>> {
        self.deleted_at
    }
}
