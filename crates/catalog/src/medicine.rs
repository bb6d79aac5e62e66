use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use rxflow_core::{Aggregate, AggregateRoot, DomainError, MedicineId, OrgId};
use rxflow_events::Event;

/// Aggregate root: Medicine (one catalog entry, owned by one vendor).
///
/// The fulfillment core resolves an order's implicit vendor and its price
/// snapshot through this aggregate's read side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Medicine {
    id: MedicineId,
    vendor_id: Option<OrgId>,
    brand_name: String,
    generic_name: String,
    /// Offer price in smallest currency unit (e.g., cents).
    unit_price: u64,
    /// Maximum retail price in smallest currency unit.
    list_price: u64,
    version: u64,
    created: bool,
}

impl Medicine {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: MedicineId) -> Self {
        Self {
            id,
            vendor_id: None,
            brand_name: String::new(),
            generic_name: String::new(),
            unit_price: 0,
            list_price: 0,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> MedicineId {
        self.id
    }

    pub fn vendor_id(&self) -> Option<OrgId> {
        self.vendor_id
    }

    pub fn brand_name(&self) -> &str {
        &self.brand_name
    }

    pub fn generic_name(&self) -> &str {
        &self.generic_name
    }

    pub fn unit_price(&self) -> u64 {
        self.unit_price
    }

    pub fn list_price(&self) -> u64 {
        self.list_price
    }
}

impl AggregateRoot for Medicine {
    type Id = MedicineId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: RegisterMedicine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterMedicine {
    pub vendor_id: OrgId,
    pub medicine_id: MedicineId,
    pub brand_name: String,
    pub generic_name: String,
    pub unit_price: u64,
    pub list_price: u64,
    pub occurred_at: DateTime<Utc>,
}

/// Command: UpdateMedicinePrices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateMedicinePrices {
    pub vendor_id: OrgId,
    pub medicine_id: MedicineId,
    pub unit_price: u64,
    pub list_price: u64,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MedicineCommand {
    RegisterMedicine(RegisterMedicine),
    UpdateMedicinePrices(UpdateMedicinePrices),
}

/// Event: MedicineRegistered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MedicineRegistered {
    pub vendor_id: OrgId,
    pub medicine_id: MedicineId,
    pub brand_name: String,
    pub generic_name: String,
    pub unit_price: u64,
    pub list_price: u64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: MedicinePricesUpdated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MedicinePricesUpdated {
    pub vendor_id: OrgId,
    pub medicine_id: MedicineId,
    pub unit_price: u64,
    pub list_price: u64,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MedicineEvent {
    MedicineRegistered(MedicineRegistered),
    MedicinePricesUpdated(MedicinePricesUpdated),
}

impl Event for MedicineEvent {
    fn event_type(&self) -> &'static str {
        match self {
            MedicineEvent::MedicineRegistered(_) => "catalog.medicine.registered",
            MedicineEvent::MedicinePricesUpdated(_) => "catalog.medicine.prices_updated",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            MedicineEvent::MedicineRegistered(e) => e.occurred_at,
            MedicineEvent::MedicinePricesUpdated(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Medicine {
    type Command = MedicineCommand;
    type Event = MedicineEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            MedicineEvent::MedicineRegistered(e) => {
                self.id = e.medicine_id;
                self.vendor_id = Some(e.vendor_id);
                self.brand_name = e.brand_name.clone();
                self.generic_name = e.generic_name.clone();
                self.unit_price = e.unit_price;
                self.list_price = e.list_price;
                self.created = true;
            }
            MedicineEvent::MedicinePricesUpdated(e) => {
                self.unit_price = e.unit_price;
                self.list_price = e.list_price;
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            MedicineCommand::RegisterMedicine(cmd) => self.handle_register(cmd),
            MedicineCommand::UpdateMedicinePrices(cmd) => self.handle_update_prices(cmd),
        }
    }
}

impl Medicine {
    fn ensure_vendor(&self, vendor_id: OrgId) -> Result<(), DomainError> {
        if !self.created {
            return Ok(());
        }
        if self.vendor_id != Some(vendor_id) {
            return Err(DomainError::invariant("vendor_id mismatch"));
        }
        Ok(())
    }

    fn ensure_medicine_id(&self, medicine_id: MedicineId) -> Result<(), DomainError> {
        if self.id != medicine_id {
            return Err(DomainError::invariant("medicine_id mismatch"));
        }
        Ok(())
    }

    fn check_prices(unit_price: u64, list_price: u64) -> Result<(), DomainError> {
        if unit_price > list_price {
            return Err(DomainError::validation(
                "offer price cannot exceed list price",
            ));
        }
        Ok(())
    }

    fn handle_register(&self, cmd: &RegisterMedicine) -> Result<Vec<MedicineEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("medicine already registered"));
        }
        if cmd.brand_name.trim().is_empty() {
            return Err(DomainError::validation("brand name cannot be empty"));
        }
        if cmd.generic_name.trim().is_empty() {
            return Err(DomainError::validation("generic name cannot be empty"));
        }
        Self::check_prices(cmd.unit_price, cmd.list_price)?;

        Ok(vec![MedicineEvent::MedicineRegistered(MedicineRegistered {
            vendor_id: cmd.vendor_id,
            medicine_id: cmd.medicine_id,
            brand_name: cmd.brand_name.clone(),
            generic_name: cmd.generic_name.clone(),
            unit_price: cmd.unit_price,
            list_price: cmd.list_price,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_update_prices(
        &self,
        cmd: &UpdateMedicinePrices,
    ) -> Result<Vec<MedicineEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_vendor(cmd.vendor_id)?;
        self.ensure_medicine_id(cmd.medicine_id)?;
        Self::check_prices(cmd.unit_price, cmd.list_price)?;

        Ok(vec![MedicineEvent::MedicinePricesUpdated(
            MedicinePricesUpdated {
                vendor_id: cmd.vendor_id,
                medicine_id: cmd.medicine_id,
                unit_price: cmd.unit_price,
                list_price: cmd.list_price,
                occurred_at: cmd.occurred_at,
            },
        )])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_vendor_id() -> OrgId {
        OrgId::new()
    }

    fn test_medicine_id() -> MedicineId {
        MedicineId::new()
    }

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn register_cmd(vendor_id: OrgId, medicine_id: MedicineId) -> RegisterMedicine {
        RegisterMedicine {
            vendor_id,
            medicine_id,
            brand_name: "Calpol".to_string(),
            generic_name: "Paracetamol".to_string(),
            unit_price: 250,
            list_price: 300,
            occurred_at: test_time(),
        }
    }

    #[test]
    fn register_medicine_emits_registered_event() {
        let medicine = Medicine::empty(test_medicine_id());
        let vendor_id = test_vendor_id();
        let medicine_id = test_medicine_id();

        let events = medicine
            .handle(&MedicineCommand::RegisterMedicine(register_cmd(
                vendor_id,
                medicine_id,
            )))
            .unwrap();
        assert_eq!(events.len(), 1);

        match &events[0] {
            MedicineEvent::MedicineRegistered(e) => {
                assert_eq!(e.vendor_id, vendor_id);
                assert_eq!(e.medicine_id, medicine_id);
                assert_eq!(e.brand_name, "Calpol");
                assert_eq!(e.unit_price, 250);
            }
            _ => panic!("Expected MedicineRegistered event"),
        }
    }

    #[test]
    fn cannot_register_twice() {
        let mut medicine = Medicine::empty(test_medicine_id());
        let vendor_id = test_vendor_id();
        let medicine_id = test_medicine_id();

        let events = medicine
            .handle(&MedicineCommand::RegisterMedicine(register_cmd(
                vendor_id,
                medicine_id,
            )))
            .unwrap();
        medicine.apply(&events[0]);

        let err = medicine
            .handle(&MedicineCommand::RegisterMedicine(register_cmd(
                vendor_id,
                medicine_id,
            )))
            .unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
    }

    #[test]
    fn offer_price_above_list_price_is_rejected() {
        let medicine = Medicine::empty(test_medicine_id());
        let mut cmd = register_cmd(test_vendor_id(), test_medicine_id());
        cmd.unit_price = 500;
        cmd.list_price = 300;

        let err = medicine
            .handle(&MedicineCommand::RegisterMedicine(cmd))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn update_prices_after_registration() {
        let mut medicine = Medicine::empty(test_medicine_id());
        let vendor_id = test_vendor_id();
        let medicine_id = test_medicine_id();

        let events = medicine
            .handle(&MedicineCommand::RegisterMedicine(register_cmd(
                vendor_id,
                medicine_id,
            )))
            .unwrap();
        medicine.apply(&events[0]);

        let update = UpdateMedicinePrices {
            vendor_id,
            medicine_id,
            unit_price: 275,
            list_price: 320,
            occurred_at: test_time(),
        };
        let events = medicine
            .handle(&MedicineCommand::UpdateMedicinePrices(update))
            .unwrap();
        medicine.apply(&events[0]);

        assert_eq!(medicine.unit_price(), 275);
        assert_eq!(medicine.list_price(), 320);
        assert_eq!(medicine.version(), 2);
    }

    #[test]
    fn cannot_update_prices_before_registration() {
        let medicine = Medicine::empty(test_medicine_id());
        let update = UpdateMedicinePrices {
            vendor_id: test_vendor_id(),
            medicine_id: test_medicine_id(),
            unit_price: 275,
            list_price: 320,
            occurred_at: test_time(),
        };

        let err = medicine
            .handle(&MedicineCommand::UpdateMedicinePrices(update))
            .unwrap_err();
        assert!(matches!(err, DomainError::NotFound));
    }
}
