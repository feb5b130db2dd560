// SPDX-FileCopyrightText: 2026 Lightmeter Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Result acceptance rules.
//!
//! Every populated field of every configured rule compiles into one filter,
//! evaluated in configuration order. The first filter that rejects drops
//! the result, the first that accepts publishes it, and a result no filter
//! decides on is published.

use lightmeter_config::FilterRule;
use lightmeter_core::{DeliveryResult, MessageDirection, ResultKey, TrackerError};
use regex::Regex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Accept,
    Reject,
    Undecided,
}

#[derive(Debug, Clone)]
enum Filter {
    /// Outbound results must have a matching sender.
    AcceptOutboundSender(Regex),
    /// Incoming results must have a matching recipient.
    AcceptInboundRecipient(Regex),
    /// Incoming results with a matching recipient are dropped.
    RejectInboundRecipient(Regex),
    /// Outbound results must carry a matching Message-ID.
    AcceptOutboundMessageId(Regex),
    /// Incoming replies must reference a matching message.
    AcceptInReplyTo(Regex),
}

#[derive(Debug, Clone, Default)]
pub struct Filters {
    filters: Vec<Filter>,
}

impl Filters {
    /// Compile `rules`. An invalid pattern is a configuration error.
    pub fn compile(rules: &[FilterRule]) -> Result<Self, TrackerError> {
        let mut filters = Vec::new();
        for (index, rule) in rules.iter().enumerate() {
            for (field, pattern) in rule.patterns() {
                let regex = Regex::new(pattern).map_err(|e| {
                    TrackerError::Config(format!("filters.rules[{index}].{field}: {e}"))
                })?;
                filters.push(match field {
                    "accept_outbound_sender" => Filter::AcceptOutboundSender(regex),
                    "accept_inbound_recipient" => Filter::AcceptInboundRecipient(regex),
                    "reject_inbound_recipient" => Filter::RejectInboundRecipient(regex),
                    "accept_outbound_message_id" => Filter::AcceptOutboundMessageId(regex),
                    "accept_in_reply_to" => Filter::AcceptInReplyTo(regex),
                    other => {
                        return Err(TrackerError::Config(format!("unknown filter field {other}")));
                    }
                });
            }
        }
        Ok(Self { filters })
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    /// Whether `result` should be published.
    pub fn accepts(&self, result: &DeliveryResult) -> bool {
        for filter in &self.filters {
            match filter.decide(result) {
                Decision::Reject => return false,
                Decision::Accept => return true,
                Decision::Undecided => {}
            }
        }
        true
    }
}

impl Filter {
    fn decide(&self, r: &DeliveryResult) -> Decision {
        match self {
            Filter::AcceptOutboundSender(pattern) => accept_only(
                r,
                pattern,
                MessageDirection::Outbound,
                ResultKey::QueueSenderLocalPart,
                ResultKey::QueueSenderDomainPart,
            ),
            Filter::AcceptInboundRecipient(pattern) => accept_only(
                r,
                pattern,
                MessageDirection::Incoming,
                ResultKey::ResultRecipientLocalPart,
                ResultKey::ResultRecipientDomainPart,
            ),
            Filter::RejectInboundRecipient(pattern) => {
                let Some((direction, address)) = directed_address(
                    r,
                    ResultKey::ResultRecipientLocalPart,
                    ResultKey::ResultRecipientDomainPart,
                ) else {
                    return Decision::Reject;
                };
                if direction == MessageDirection::Incoming && pattern.is_match(&address) {
                    Decision::Reject
                } else {
                    Decision::Undecided
                }
            }
            Filter::AcceptOutboundMessageId(pattern) => {
                if r.direction() != Some(MessageDirection::Outbound) {
                    return Decision::Undecided;
                }
                match r.text(ResultKey::QueueMessageId) {
                    Some(id) if pattern.is_match(id) => Decision::Undecided,
                    _ => Decision::Reject,
                }
            }
            Filter::AcceptInReplyTo(pattern) => {
                if r.direction() != Some(MessageDirection::Incoming) {
                    return Decision::Undecided;
                }

                let mut references: Vec<String> = match r.text(ResultKey::QueueReferencesHeader) {
                    Some(json) => match serde_json::from_str(json) {
                        Ok(list) => list,
                        Err(_) => return Decision::Undecided,
                    },
                    None => Vec::new(),
                };
                if let Some(in_reply_to) = r.text(ResultKey::QueueInReplyToHeader) {
                    references.push(in_reply_to.to_string());
                }

                if references.is_empty() || references.iter().any(|id| pattern.is_match(id)) {
                    Decision::Undecided
                } else {
                    Decision::Reject
                }
            }
        }
    }
}

/// Direction and `local@domain` of a result; `None` if any is missing.
fn directed_address(
    r: &DeliveryResult,
    local: ResultKey,
    domain: ResultKey,
) -> Option<(MessageDirection, String)> {
    let local = r.text(local)?;
    let domain = r.text(domain)?;
    let direction = r.direction()?;
    Some((direction, format!("{local}@{domain}")))
}

fn accept_only(
    r: &DeliveryResult,
    pattern: &Regex,
    direction: MessageDirection,
    local: ResultKey,
    domain: ResultKey,
) -> Decision {
    let Some((actual, address)) = directed_address(r, local, domain) else {
        return Decision::Reject;
    };
    if actual != direction || pattern.is_match(&address) {
        Decision::Undecided
    } else {
        Decision::Reject
    }
}
