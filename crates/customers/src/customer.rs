use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use bankbook_core::{Aggregate, AggregateRoot, CustomerId, DomainError};
use bankbook_events::Event;

use crate::contact::{ContactInfo, normalize, validate_login};

/// Stream type of every customer stream.
pub const AGGREGATE_TYPE: &str = "customers.customer";

/// Aggregate root: Customer (a principal that may own accounts).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Customer {
    id: CustomerId,
    name: String,
    login: String,
    contact: ContactInfo,
    version: u64,
    created: bool,
    removed: bool,
}

impl Customer {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: CustomerId) -> Self {
        Self {
            id,
            name: String::new(),
            login: String::new(),
            contact: ContactInfo::default(),
            version: 0,
            created: false,
            removed: false,
        }
    }

    pub fn id_typed(&self) -> CustomerId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn login(&self) -> &str {
        &self.login
    }

    pub fn contact(&self) -> &ContactInfo {
        &self.contact
    }

    pub fn is_active(&self) -> bool {
        self.created && !self.removed
    }
}

impl AggregateRoot for Customer {
    type Id = CustomerId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: RegisterCustomer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterCustomer {
    pub customer_id: CustomerId,
    pub name: String,
    pub login: String,
    pub contact: Option<ContactInfo>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: UpdateCustomer.
///
/// Absent fields keep their current value; contact fields set to a blank string are cleared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateCustomer {
    pub customer_id: CustomerId,
    pub name: Option<String>,
    pub login: Option<String>,
    pub contact: Option<ContactInfo>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RemoveCustomer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveCustomer {
    pub customer_id: CustomerId,
    /// Number of accounts currently listing this customer as an owner.
    pub owned_accounts: usize,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CustomerCommand {
    RegisterCustomer(RegisterCustomer),
    UpdateCustomer(UpdateCustomer),
    RemoveCustomer(RemoveCustomer),
}

/// Event: CustomerRegistered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerRegistered {
    pub customer_id: CustomerId,
    pub name: String,
    pub login: String,
    pub contact: ContactInfo,
    pub occurred_at: DateTime<Utc>,
}

/// Event: CustomerUpdated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerUpdated {
    pub customer_id: CustomerId,
    pub name: String,
    pub login: String,
    pub contact: ContactInfo,
    pub occurred_at: DateTime<Utc>,
}

/// Event: CustomerRemoved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerRemoved {
    pub customer_id: CustomerId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CustomerEvent {
    CustomerRegistered(CustomerRegistered),
    CustomerUpdated(CustomerUpdated),
    CustomerRemoved(CustomerRemoved),
}

impl CustomerEvent {
    pub fn customer_id(&self) -> CustomerId {
        match self {
            CustomerEvent::CustomerRegistered(e) => e.customer_id,
            CustomerEvent::CustomerUpdated(e) => e.customer_id,
            CustomerEvent::CustomerRemoved(e) => e.customer_id,
        }
    }
}

impl Event for CustomerEvent {
    fn event_type(&self) -> &'static str {
        match self {
            CustomerEvent::CustomerRegistered(_) => "customers.customer.registered",
            CustomerEvent::CustomerUpdated(_) => "customers.customer.updated",
            CustomerEvent::CustomerRemoved(_) => "customers.customer.removed",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            CustomerEvent::CustomerRegistered(e) => e.occurred_at,
            CustomerEvent::CustomerUpdated(e) => e.occurred_at,
            CustomerEvent::CustomerRemoved(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Customer {
    type Command = CustomerCommand;
    type Event = CustomerEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            CustomerEvent::CustomerRegistered(e) => {
                self.id = e.customer_id;
                self.name = e.name.clone();
                self.login = e.login.clone();
                self.contact = e.contact.clone();
                self.created = true;
            }
            CustomerEvent::CustomerUpdated(e) => {
                self.name = e.name.clone();
                self.login = e.login.clone();
                self.contact = e.contact.clone();
            }
            CustomerEvent::CustomerRemoved(_) => {
                self.removed = true;
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            CustomerCommand::RegisterCustomer(cmd) => self.handle_register(cmd),
            CustomerCommand::UpdateCustomer(cmd) => self.handle_update(cmd),
            CustomerCommand::RemoveCustomer(cmd) => self.handle_remove(cmd),
        }
    }
}

/// Name, then login, then contact fields.
fn validate_profile(name: &str, login: &str, contact: &ContactInfo) -> Result<(), DomainError> {
    if name.is_empty() {
        return Err(DomainError::validation("customer name cannot be empty"));
    }
    if login.is_empty() {
        return Err(DomainError::validation("login is required"));
    }
    validate_login(login)?;
    contact.validate()
}

impl Customer {
    fn ensure_active(&self) -> Result<(), DomainError> {
        if !self.is_active() {
            return Err(DomainError::not_found());
        }
        Ok(())
    }

    fn ensure_customer_id(&self, customer_id: CustomerId) -> Result<(), DomainError> {
        if self.id != customer_id {
            return Err(DomainError::invalid_id("customer_id mismatch"));
        }
        Ok(())
    }

    fn handle_register(&self, cmd: &RegisterCustomer) -> Result<Vec<CustomerEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("customer already exists"));
        }

        let name = normalize(Some(cmd.name.as_str())).unwrap_or_default();
        let login = normalize(Some(cmd.login.as_str())).unwrap_or_default();
        let contact = cmd.contact.clone().unwrap_or_default().normalized();
        validate_profile(&name, &login, &contact)?;

        Ok(vec![CustomerEvent::CustomerRegistered(CustomerRegistered {
            customer_id: cmd.customer_id,
            name,
            login,
            contact,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_update(&self, cmd: &UpdateCustomer) -> Result<Vec<CustomerEvent>, DomainError> {
        self.ensure_active()?;
        self.ensure_customer_id(cmd.customer_id)?;

        let name = match &cmd.name {
            Some(name) => normalize(Some(name.as_str())).unwrap_or_default(),
            None => self.name.clone(),
        };
        let login = match &cmd.login {
            Some(login) => normalize(Some(login.as_str())).unwrap_or_default(),
            None => self.login.clone(),
        };
        let contact = match &cmd.contact {
            Some(changes) => self.contact.merged(changes).normalized(),
            None => self.contact.clone(),
        };
        validate_profile(&name, &login, &contact)?;

        Ok(vec![CustomerEvent::CustomerUpdated(CustomerUpdated {
            customer_id: cmd.customer_id,
            name,
            login,
            contact,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_remove(&self, cmd: &RemoveCustomer) -> Result<Vec<CustomerEvent>, DomainError> {
        self.ensure_active()?;
        self.ensure_customer_id(cmd.customer_id)?;

        if cmd.owned_accounts > 0 {
            return Err(DomainError::integrity(format!(
                "the customer '{}' cannot be removed because it has associated bank accounts",
                self.name
            )));
        }

        Ok(vec![CustomerEvent::CustomerRemoved(CustomerRemoved {
            customer_id: cmd.customer_id,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bankbook_events::execute;

    fn test_customer_id() -> CustomerId {
        CustomerId::new()
    }

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn register_cmd(customer_id: CustomerId, login: &str) -> RegisterCustomer {
        RegisterCustomer {
            customer_id,
            name: "Ana Ruiz".to_string(),
            login: login.to_string(),
            contact: Some(ContactInfo {
                city: Some("Madrid".to_string()),
                zip: Some("28001".to_string()),
                phone: None,
            }),
            occurred_at: test_time(),
        }
    }

    fn registered() -> Customer {
        let id = test_customer_id();
        let mut customer = Customer::empty(id);
        execute(
            &mut customer,
            &CustomerCommand::RegisterCustomer(register_cmd(id, "a@b.com")),
        )
        .unwrap();
        customer
    }

    fn update_cmd(customer: &Customer) -> UpdateCustomer {
        UpdateCustomer {
            customer_id: customer.id_typed(),
            name: None,
            login: None,
            contact: None,
            occurred_at: test_time(),
        }
    }

    #[test]
    fn register_customer_emits_customer_registered_event() {
        let id = test_customer_id();
        let events = Customer::empty(id)
            .handle(&CustomerCommand::RegisterCustomer(register_cmd(id, " a@b.com ")))
            .unwrap();

        assert_eq!(events.len(), 1);
        match &events[0] {
            CustomerEvent::CustomerRegistered(e) => {
                assert_eq!(e.customer_id, id);
                assert_eq!(e.login, "a@b.com");
                assert_eq!(e.contact.city.as_deref(), Some("Madrid"));
            }
            other => panic!("Expected CustomerRegistered event, got {other:?}"),
        }
    }

    #[test]
    fn register_rejects_malformed_login() {
        let id = test_customer_id();
        let err = Customer::empty(id)
            .handle(&CustomerCommand::RegisterCustomer(register_cmd(id, "not-an-email")))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn register_requires_login_and_name() {
        let id = test_customer_id();
        let customer = Customer::empty(id);

        let no_login = register_cmd(id, "   ");
        let mut no_name = register_cmd(id, "a@b.com");
        no_name.name = String::new();

        for cmd in [no_login, no_name] {
            let err = customer
                .handle(&CustomerCommand::RegisterCustomer(cmd))
                .unwrap_err();
            assert!(matches!(err, DomainError::Validation(_)), "got {err:?}");
        }
    }

    #[test]
    fn update_validates_the_merged_profile() {
        let mut customer = registered();

        let mut bad_login = update_cmd(&customer);
        bad_login.login = Some("not-an-email".to_string());
        let err = customer
            .handle(&CustomerCommand::UpdateCustomer(bad_login))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));

        let mut bad_zip = update_cmd(&customer);
        bad_zip.contact = Some(ContactInfo {
            zip: Some("123456".to_string()),
            ..ContactInfo::default()
        });
        assert!(customer.handle(&CustomerCommand::UpdateCustomer(bad_zip)).is_err());

        let mut phone = update_cmd(&customer);
        phone.contact = Some(ContactInfo {
            phone: Some("626170034".to_string()),
            ..ContactInfo::default()
        });
        execute(&mut customer, &CustomerCommand::UpdateCustomer(phone)).unwrap();

        assert_eq!(customer.login(), "a@b.com");
        assert_eq!(customer.contact().zip.as_deref(), Some("28001"));
        assert_eq!(customer.contact().phone.as_deref(), Some("626170034"));
    }

    #[test]
    fn blank_contact_field_clears_it() {
        let mut customer = registered();
        let mut cmd = update_cmd(&customer);
        cmd.contact = Some(ContactInfo {
            city: Some(String::new()),
            ..ContactInfo::default()
        });

        execute(&mut customer, &CustomerCommand::UpdateCustomer(cmd)).unwrap();
        assert_eq!(customer.contact().city, None);
    }

    #[test]
    fn customer_with_accounts_cannot_be_removed() {
        let mut customer = registered();
        let remove = |owned_accounts| {
            CustomerCommand::RemoveCustomer(RemoveCustomer {
                customer_id: customer.id_typed(),
                owned_accounts,
                occurred_at: test_time(),
            })
        };
        let blocked = remove(1);
        let allowed = remove(0);

        match customer.handle(&blocked).unwrap_err() {
            DomainError::Integrity(msg) => assert!(msg.contains("'Ana Ruiz'")),
            other => panic!("Expected integrity error, got {other:?}"),
        }

        execute(&mut customer, &allowed).unwrap();
        assert!(!customer.is_active());
        assert_eq!(
            customer.handle(&CustomerCommand::UpdateCustomer(update_cmd(&customer))),
            Err(DomainError::NotFound)
        );
    }

    #[test]
    fn register_twice_is_a_conflict() {
        let customer = registered();
        let cmd = register_cmd(customer.id_typed(), "a@b.com");
        let err = customer
            .handle(&CustomerCommand::RegisterCustomer(cmd))
            .unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
    }

    #[test]
    fn version_increments_per_applied_event() {
        let mut customer = registered();
        assert_eq!(customer.version(), 1);
        let cmd = CustomerCommand::UpdateCustomer(update_cmd(&customer));
        execute(&mut customer, &cmd).unwrap();
        assert_eq!(customer.version(), 2);
    }
}
