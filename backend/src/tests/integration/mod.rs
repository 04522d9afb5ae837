pub mod api_automations;
pub mod confirmation;
pub mod dispatcher;
