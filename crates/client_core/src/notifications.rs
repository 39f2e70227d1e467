use shared::{
    domain::NotificationId,
    protocol::{NotificationPage, NotificationPayload},
};

/// Cached first page of the notification list plus the unread counter.
#[derive(Debug, Default, Clone)]
pub struct NotificationFeed {
    items: Vec<NotificationPayload>,
    total: u64,
    loaded: bool,
    stale: bool,
}

/// What an optimistic read-marking changed, so it can be undone.
#[derive(Debug, Clone)]
pub struct ReadRollback {
    previously_unread: Vec<NotificationId>,
}

impl NotificationFeed {
    pub fn replace(&mut self, page: NotificationPage) {
        self.items = page.items;
        self.total = page.total;
        self.loaded = true;
        self.stale = false;
    }

    pub fn invalidate(&mut self) {
        self.stale = true;
    }

    pub fn needs_refresh(&self) -> bool {
        !self.loaded || self.stale
    }

    pub fn items(&self) -> &[NotificationPayload] {
        &self.items
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn unread_count(&self) -> usize {
        self.items.iter().filter(|item| !item.is_read).count()
    }

    pub fn mark_read(&mut self, id: NotificationId) -> ReadRollback {
        let mut previously_unread = Vec::new();
        if let Some(item) = self.items.iter_mut().find(|item| item.id == id && !item.is_read) {
            item.is_read = true;
            previously_unread.push(id);
        }
        ReadRollback { previously_unread }
    }

    pub fn mark_all_read(&mut self) -> ReadRollback {
        let previously_unread = self
            .items
            .iter_mut()
            .filter(|item| !item.is_read)
            .map(|item| {
                item.is_read = true;
                item.id
            })
            .collect();
        ReadRollback { previously_unread }
    }

    pub fn rollback(&mut self, rollback: ReadRollback) {
        for item in &mut self.items {
            if rollback.previously_unread.contains(&item.id) {
                item.is_read = false;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn notification(id: i64, is_read: bool) -> NotificationPayload {
        NotificationPayload {
            id: NotificationId(id),
            message: format!("notification {id}"),
            task_id: None,
            board_id: None,
            is_read,
            created_at: Utc::now(),
        }
    }

    fn loaded_feed() -> NotificationFeed {
        let mut feed = NotificationFeed::default();
        feed.replace(NotificationPage {
            items: vec![notification(1, false), notification(2, true), notification(3, false)],
            total: 3,
        });
        feed
    }

    #[test]
    fn invalidation_marks_feed_for_refresh() {
        let mut feed = NotificationFeed::default();
        assert!(feed.needs_refresh());
        feed.replace(NotificationPage::default());
        assert!(!feed.needs_refresh());
        feed.invalidate();
        assert!(feed.needs_refresh());
    }

    #[test]
    fn mark_all_read_rolls_back_only_what_it_changed() {
        let mut feed = loaded_feed();
        let rollback = feed.mark_all_read();
        assert_eq!(feed.unread_count(), 0);
        feed.rollback(rollback);
        assert_eq!(feed.unread_count(), 2);
        assert!(feed.items()[1].is_read);
    }

    #[test]
    fn mark_read_of_already_read_item_is_noop() {
        let mut feed = loaded_feed();
        let rollback = feed.mark_read(NotificationId(2));
        feed.rollback(rollback);
        assert!(feed.items()[1].is_read);
        assert_eq!(feed.unread_count(), 2);
    }
}
