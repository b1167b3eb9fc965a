//! ID prefix constants.
//!
//! Every row id is `<prefix>-<16 lowercase hex>`, generated in SQL by
//! `CsrDb::generate_id`. The prefix makes ids self-describing in logs and
//! audit rows.

pub const PREFIX_COMPANY: &str = "cmp";
pub const PREFIX_USER: &str = "usr";
pub const PREFIX_AUDIT: &str = "aud";
pub const PREFIX_PII: &str = "pii";
pub const PREFIX_CONSENT: &str = "cns";
pub const PREFIX_SUBSCRIPTION: &str = "sub";
pub const PREFIX_POLICY: &str = "pol";
pub const PREFIX_TEMPLATE: &str = "tpl";
pub const PREFIX_BENEFICIARY_GROUP: &str = "bgp";
pub const PREFIX_CAMPAIGN: &str = "cpg";
pub const PREFIX_INSTANCE: &str = "pin";
pub const PREFIX_MATCH: &str = "bmt";
pub const PREFIX_BUDDY_EVENT: &str = "bev";
pub const PREFIX_DELIVERY: &str = "dlv";
pub const PREFIX_EVENT_DEDUP: &str = "edd";
pub const PREFIX_IDEMPOTENCY: &str = "idm";
pub const PREFIX_NLQ: &str = "nlq";
pub const PREFIX_SAFETY_CHECK: &str = "nsc";
pub const PREFIX_NOTIFICATION: &str = "ntf";
pub const PREFIX_PUBLICATION: &str = "pub";
pub const PREFIX_SCENARIO: &str = "scn";
pub const PREFIX_METRIC: &str = "met";
pub const PREFIX_LEDGER: &str = "led";
pub const PREFIX_LEDGER_AUDIT: &str = "lau";

/// All prefixes, for exhaustive tests.
pub const ALL_PREFIXES: &[&str] = &[
    PREFIX_COMPANY,
    PREFIX_USER,
    PREFIX_AUDIT,
    PREFIX_PII,
    PREFIX_CONSENT,
    PREFIX_SUBSCRIPTION,
    PREFIX_POLICY,
    PREFIX_TEMPLATE,
    PREFIX_BENEFICIARY_GROUP,
    PREFIX_CAMPAIGN,
    PREFIX_INSTANCE,
    PREFIX_MATCH,
    PREFIX_BUDDY_EVENT,
    PREFIX_DELIVERY,
    PREFIX_EVENT_DEDUP,
    PREFIX_IDEMPOTENCY,
    PREFIX_NLQ,
    PREFIX_SAFETY_CHECK,
    PREFIX_NOTIFICATION,
    PREFIX_PUBLICATION,
    PREFIX_SCENARIO,
    PREFIX_METRIC,
    PREFIX_LEDGER,
    PREFIX_LEDGER_AUDIT,
];
