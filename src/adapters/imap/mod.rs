pub mod connection;
pub mod envelopes;
pub mod folders;

use async_trait::async_trait;
use futures::TryStreamExt;
use async_imap::types::Fetch;
use tracing::debug;

use crate::adapters::FolderSession;
use crate::types::error::{MonitorError, Result};
use crate::types::{FetchedEnvelope, FolderStatus};

pub use connection::{connect, ImapConnection};

#[async_trait]
impl FolderSession for ImapConnection {
    async fn list_folders(&mut self) -> Result<Vec<String>> {
        let folders = folders::list_folders(&mut self.session).await?;
        Ok(folders::selectable_names(&folders))
    }

    async fn select_folder(&mut self, folder: &str) -> Result<FolderStatus> {
        // STATUS gives the unseen total; SELECT/EXAMINE only reports the
        // sequence number of the first unseen message.
        let status = self
            .session
            .status(folder, "(MESSAGES UNSEEN)")
            .await
            .map_err(|e| MonitorError::Mailbox(format!("STATUS {} failed: {}", folder, e)))?;

        self.examine(folder).await?;

        Ok(FolderStatus {
            message_count: status.exists,
            unseen_count: status.unseen.unwrap_or(0),
        })
    }

    async fn search_unseen(&mut self) -> Result<Vec<u32>> {
        let uid_set = self
            .session
            .uid_search("UNSEEN")
            .await
            .map_err(|e| MonitorError::Mailbox(format!("SEARCH failed: {}", e)))?;

        let mut uids: Vec<u32> = uid_set.into_iter().collect();
        uids.sort_unstable();
        Ok(uids)
    }

    async fn fetch(&mut self, uids: &[u32]) -> Result<Vec<FetchedEnvelope>> {
        if uids.is_empty() {
            return Ok(Vec::new());
        }

        let uid_list: String = uids
            .iter()
            .map(|u| u.to_string())
            .collect::<Vec<_>>()
            .join(",");

        let fetches: Vec<Fetch> = self
            .session
            .uid_fetch(&uid_list, "(UID ENVELOPE)")
            .await
            .map_err(|e| MonitorError::Mailbox(format!("FETCH failed: {}", e)))?
            .try_collect()
            .await
            .map_err(|e| MonitorError::Mailbox(format!("Collect failed: {}", e)))?;

        let mut envelopes: Vec<FetchedEnvelope> =
            fetches.iter().filter_map(envelopes::parse_envelope).collect();
        envelopes.sort_by_key(|env| env.uid);
        debug!("Fetched {} envelopes", envelopes.len());
        Ok(envelopes)
    }

    async fn logout(&mut self) -> Result<()> {
        self.session
            .logout()
            .await
            .map_err(|e| MonitorError::Connection(format!("LOGOUT failed: {}", e)))
    }
}
