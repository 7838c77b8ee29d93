use delve_common::EntityId;

/// Turns an opaque session ticket into a stable player id.
pub trait SessionAuth {
    fn authenticate(&self, ticket: &str) -> Option<EntityId>;
}

/// Development auth: a well-formed ticket is the player id itself.
///
/// Accepts 1..=64 ASCII letters, digits, `-` and `_`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TicketAsId;

const MAX_TICKET_LEN: usize = 64;

impl SessionAuth for TicketAsId {
    fn authenticate(&self, ticket: &str) -> Option<EntityId> {
        let well_formed = !ticket.is_empty()
            && ticket.len() <= MAX_TICKET_LEN
            && ticket
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
        well_formed.then(|| EntityId::new(ticket))
    }
}
