/// Static caller allow-list gating the user-facing commands. Empty means unrestricted.
#[derive(Debug, Clone, Default)]
pub struct AllowList {
    user_ids: Vec<u64>,
}

pub const RESTRICTED_MESSAGE: &str = "Sorry, you are not allowed to use this command.";

impl AllowList {
    pub fn new(user_ids: Vec<u64>) -> Self {
        Self { user_ids }
    }

    pub fn permits(&self, user_id: u64) -> bool {
        self.user_ids.is_empty() || self.user_ids.contains(&user_id)
    }

    pub fn is_restricted(&self) -> bool {
        !self.user_ids.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_list_is_unrestricted() {
        let list = AllowList::default();
        assert!(!list.is_restricted());
        assert!(list.permits(12345));
    }

    #[test]
    fn listed_users_only() {
        let list = AllowList::new(vec![1, 2]);
        assert!(list.permits(2));
        assert!(!list.permits(3));
    }
}
