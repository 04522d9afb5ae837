// Execution Context - ephemeral data snapshot available to a run

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tradeflow_shared::{AutomationRun, OwnerSettings};
use uuid::Uuid;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LeadData {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub service_type: Option<String>,
    /// Quoted price in cents
    pub calculated_price: Option<i64>,
    pub stage: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LineItem {
    pub description: String,
    #[serde(default = "default_quantity")]
    pub quantity: i64,
    pub unit_price_cents: i64,
}

fn default_quantity() -> i64 {
    1
}

impl LineItem {
    pub fn amount_cents(&self) -> i64 {
        self.quantity.saturating_mul(self.unit_price_cents)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EstimateData {
    pub estimate_number: Option<String>,
    pub customer_name: Option<String>,
    pub customer_email: Option<String>,
    pub customer_phone: Option<String>,
    pub total_cents: Option<i64>,
    pub valid_until: Option<NaiveDate>,
    #[serde(default)]
    pub line_items: Vec<LineItem>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkOrderData {
    pub work_order_number: Option<String>,
    pub customer_name: Option<String>,
    pub customer_email: Option<String>,
    pub customer_phone: Option<String>,
    pub address: Option<String>,
    pub scheduled_date: Option<NaiveDate>,
    pub total_cents: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InvoiceData {
    pub invoice_number: Option<String>,
    pub customer_name: Option<String>,
    pub customer_email: Option<String>,
    pub customer_phone: Option<String>,
    pub amount_due_cents: Option<i64>,
    pub due_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BusinessData {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
}

/// The record a stage update or tag association lands on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum RecordRef {
    Lead(Uuid),
    MultiServiceLead(Uuid),
}

/// Context for a single automation run. Never persisted as a whole: only the
/// linked record ids survive on the run row.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionContext {
    pub owner_id: Uuid,
    pub lead_id: Option<Uuid>,
    pub multi_service_lead_id: Option<Uuid>,
    pub estimate_id: Option<Uuid>,
    pub work_order_id: Option<Uuid>,
    pub invoice_id: Option<Uuid>,
    #[serde(default)]
    pub lead_data: Option<LeadData>,
    #[serde(default)]
    pub estimate_data: Option<EstimateData>,
    #[serde(default)]
    pub work_order_data: Option<WorkOrderData>,
    #[serde(default)]
    pub invoice_data: Option<InvoiceData>,
    #[serde(default)]
    pub business: Option<BusinessData>,
}

impl ExecutionContext {
    pub fn for_owner(owner_id: Uuid) -> Self {
        Self {
            owner_id,
            ..Default::default()
        }
    }

    pub fn with_lead(mut self, lead_id: Uuid, data: LeadData) -> Self {
        self.lead_id = Some(lead_id);
        self.lead_data = Some(data);
        self
    }

    pub fn with_multi_service_lead(mut self, lead_id: Uuid, data: LeadData) -> Self {
        self.multi_service_lead_id = Some(lead_id);
        self.lead_data = Some(data);
        self
    }

    pub fn with_estimate(mut self, estimate_id: Uuid, data: EstimateData) -> Self {
        self.estimate_id = Some(estimate_id);
        self.estimate_data = Some(data);
        self
    }

    pub fn with_work_order(mut self, work_order_id: Uuid, data: WorkOrderData) -> Self {
        self.work_order_id = Some(work_order_id);
        self.work_order_data = Some(data);
        self
    }

    pub fn with_invoice(mut self, invoice_id: Uuid, data: InvoiceData) -> Self {
        self.invoice_id = Some(invoice_id);
        self.invoice_data = Some(data);
        self
    }

    pub fn with_business(mut self, data: BusinessData) -> Self {
        self.business = Some(data);
        self
    }

    /// Fill business fields the caller left out from the owner's settings.
    pub fn with_owner_business(mut self, owner: &OwnerSettings) -> Self {
        let business = self.business.get_or_insert_with(BusinessData::default);
        if business.name.is_none() {
            business.name = owner.business_name.clone();
        }
        if business.phone.is_none() {
            business.phone = owner.business_phone.clone();
        }
        if business.email.is_none() {
            business.email = owner.business_email.clone();
        }
        self
    }

    /// Rebuild the id-only context of a persisted run. Field snapshots are
    /// gone by then; anything that needed them was rendered up front.
    pub fn from_run(run: &AutomationRun) -> Self {
        Self {
            owner_id: run.owner_id,
            lead_id: run.lead_id,
            multi_service_lead_id: run.multi_service_lead_id,
            estimate_id: run.estimate_id,
            work_order_id: run.work_order_id,
            invoice_id: run.invoice_id,
            ..Default::default()
        }
    }

    pub fn lead(&self) -> Option<&LeadData> {
        self.lead_data.as_ref()
    }

    pub fn estimate(&self) -> Option<&EstimateData> {
        self.estimate_data.as_ref()
    }

    pub fn work_order(&self) -> Option<&WorkOrderData> {
        self.work_order_data.as_ref()
    }

    pub fn invoice(&self) -> Option<&InvoiceData> {
        self.invoice_data.as_ref()
    }

    /// Customer name, looked up lead first, then estimate, work order, invoice.
    pub fn customer_name(&self) -> Option<&str> {
        first_present([
            self.lead().and_then(|l| l.name.as_deref()),
            self.estimate().and_then(|e| e.customer_name.as_deref()),
            self.work_order().and_then(|w| w.customer_name.as_deref()),
            self.invoice().and_then(|i| i.customer_name.as_deref()),
        ])
    }

    /// Email recipient in priority order across the linked records.
    pub fn recipient_email(&self) -> Option<&str> {
        first_present([
            self.lead().and_then(|l| l.email.as_deref()),
            self.estimate().and_then(|e| e.customer_email.as_deref()),
            self.work_order().and_then(|w| w.customer_email.as_deref()),
            self.invoice().and_then(|i| i.customer_email.as_deref()),
        ])
    }

    pub fn recipient_phone(&self) -> Option<&str> {
        first_present([
            self.lead().and_then(|l| l.phone.as_deref()),
            self.estimate().and_then(|e| e.customer_phone.as_deref()),
            self.work_order().and_then(|w| w.customer_phone.as_deref()),
            self.invoice().and_then(|i| i.customer_phone.as_deref()),
        ])
    }

    pub fn customer_address(&self) -> Option<&str> {
        first_present([
            self.lead().and_then(|l| l.address.as_deref()),
            self.work_order().and_then(|w| w.address.as_deref()),
        ])
    }

    /// Target of stage updates and tags. A plain lead wins over a
    /// multi-service lead when both are set.
    pub fn record_target(&self) -> Option<RecordRef> {
        self.lead_id
            .map(RecordRef::Lead)
            .or(self.multi_service_lead_id.map(RecordRef::MultiServiceLead))
    }
}

fn first_present<const N: usize>(candidates: [Option<&str>; N]) -> Option<&str> {
    candidates
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|value| !value.is_empty())
}
