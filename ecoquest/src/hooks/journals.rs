use chrono::Utc;
use ecoquest_sync::{Mutation, MutationObserver, Query, QueryObserver};
use std::time::Duration;

use super::EcoQuest;
use crate::api::{JournalEntry, NewJournalEntry};
use crate::keys;

pub const JOURNALS_STALE_TIME: Duration = Duration::from_secs(60);

/// Placeholder entries shown before the server assigns an id use negative ids
fn placeholder(entry: &NewJournalEntry) -> JournalEntry {
    let created_at = Utc::now();
    JournalEntry {
        id: -created_at.timestamp_millis(),
        title: entry.title.clone(),
        content: entry.content.clone(),
        mood: entry.mood.clone(),
        photo_urls: entry.photo_urls.clone(),
        created_at,
    }
}

impl EcoQuest {
    pub fn journals_query(&self) -> Query<Vec<JournalEntry>> {
        let api = self.api.clone();
        Query::new(keys::journals(), move || {
            let api = api.clone();
            async move { api.journals().await }
        })
        .stale_time(JOURNALS_STALE_TIME)
        .enabled(self.auth.is_authenticated())
    }

    pub fn use_journals(&self) -> QueryObserver<Vec<JournalEntry>> {
        self.client.use_query(self.journals_query())
    }

    pub fn journal_query(&self, id: i64) -> Query<JournalEntry> {
        let api = self.api.clone();
        Query::new(keys::journal(id), move || {
            let api = api.clone();
            async move { api.journal(id).await }
        })
        .stale_time(JOURNALS_STALE_TIME)
        .enabled(self.auth.is_authenticated())
    }

    pub fn use_journal(&self, id: i64) -> QueryObserver<JournalEntry> {
        self.client.use_query(self.journal_query(id))
    }

    /// Prepend a placeholder entry; writing a journal also awards points, so
    /// the profile is refreshed too.
    pub fn create_journal_entry_mutation(&self) -> Mutation<NewJournalEntry, JournalEntry> {
        let api = self.api.clone();
        Mutation::new("create_journal_entry", move |entry: NewJournalEntry| {
            let api = api.clone();
            async move { api.create_journal_entry(&entry).await }
        })
        .optimistic(
            |_| vec![keys::journals()],
            |client, entry| {
                client.set_query_data::<Vec<JournalEntry>, _>(&keys::journals(), |current| {
                    let current = current?;
                    let mut next = Vec::with_capacity(current.len() + 1);
                    next.push(placeholder(entry));
                    next.extend(current.iter().cloned());
                    Some(next)
                })?;
                Ok(())
            },
        )
        .on_success(|client, created, entry| {
            let _ = client.set_query_data::<Vec<JournalEntry>, _>(&keys::journals(), |current| {
                let current = current?;
                let mut replaced = false;
                let next: Vec<JournalEntry> = current
                    .iter()
                    .map(|existing| {
                        if !replaced && existing.id < 0 && existing.title == entry.title {
                            replaced = true;
                            created.clone()
                        } else {
                            existing.clone()
                        }
                    })
                    .collect();
                Some(next)
            });
        })
        .invalidates(keys::journals())
        .invalidates(keys::profile())
    }

    pub fn use_create_journal_entry(&self) -> MutationObserver<NewJournalEntry, JournalEntry> {
        self.client.use_mutation(self.create_journal_entry_mutation())
    }

    pub fn delete_journal_entry_mutation(&self) -> Mutation<i64, ()> {
        let api = self.api.clone();
        Mutation::new("delete_journal_entry", move |id: i64| {
            let api = api.clone();
            async move { api.delete_journal_entry(id).await }
        })
        .optimistic(
            |_| vec![keys::journals()],
            |client, id| {
                client.set_query_data::<Vec<JournalEntry>, _>(&keys::journals(), |current| {
                    let current = current?;
                    Some(current.iter().filter(|entry| entry.id != *id).cloned().collect())
                })?;
                Ok(())
            },
        )
        .on_success(|client, _, id| {
            client.remove_queries(keys::journal(*id));
        })
        .invalidates(keys::journals())
    }

    pub fn use_delete_journal_entry(&self) -> MutationObserver<i64, ()> {
        self.client.use_mutation(self.delete_journal_entry_mutation())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholder_has_negative_id() {
        let entry = NewJournalEntry {
            title: "Farmers market".to_string(),
            content: "Bought local".to_string(),
            mood: Some("happy".to_string()),
            photo_urls: Vec::new(),
        };
        let placeholder = placeholder(&entry);
        assert!(placeholder.id < 0);
        assert_eq!(placeholder.title, "Farmers market");
        assert_eq!(placeholder.mood.as_deref(), Some("happy"));
    }
}
