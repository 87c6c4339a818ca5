//! Request dispatch.

use std::collections::HashMap;

use parking_lot::Mutex;
use tracing::debug;

use crate::buffer::{BufferManager, PageHandle};
use crate::common::{is_valid_name, PageKey, SetId};
use crate::frontend::{PageInfo, PageRef, Request, Response};

/// Serves [`Request`]s against a [`BufferManager`].
///
/// The frontend keeps one handle for every page it has handed out; a
/// return request drops it. Malformed requests get an error response
/// instead of reaching a panicking core call.
pub struct BufferManagerFrontend {
    manager: BufferManager,
    sent: Mutex<HashMap<PageKey, PageHandle>>,
}

impl BufferManagerFrontend {
    pub fn new(manager: BufferManager) -> Self {
        Self {
            manager,
            sent: Mutex::new(HashMap::new()),
        }
    }

    #[inline]
    pub fn manager(&self) -> &BufferManager {
        &self.manager
    }

    /// Number of pages handed out and not yet returned.
    pub fn outstanding(&self) -> usize {
        self.sent.lock().len()
    }

    pub fn handle(&self, request: Request) -> Response {
        debug!(?request, "frontend.request");
        let response = match request {
            Request::GetPage {
                database,
                set,
                page,
            } => self.get_page(&database, &set, page),
            Request::GetAnonymousPage { min_bytes } => self.get_anonymous_page(min_bytes),
            Request::ReturnPage {
                database,
                set,
                page,
            } => match named_key(&database, &set, page) {
                Ok(key) => self.return_page(&key),
                Err(response) => response,
            },
            Request::ReturnAnonymousPage { page } => self.return_page(&PageKey::Anonymous(page)),
            Request::FreezeSize { page, bytes } => self.with_page(&page, |handle| {
                let status = handle.status();
                if status.was_unpinned {
                    return Response::Error(format!(
                        "{} was unpinned; its size is frozen at {:?}",
                        handle.key(),
                        status.frozen_size
                    ));
                }
                if bytes > handle.capacity() {
                    return Response::Error(format!(
                        "cannot freeze {} at {} bytes; capacity is {}",
                        handle.key(),
                        bytes,
                        handle.capacity()
                    ));
                }
                handle.freeze_size(bytes);
                Response::Ok
            }),
            Request::PinPage { page } => self.with_page(&page, |handle| match handle.repin() {
                Ok(()) => Response::Page(PageInfo::from(&*handle)),
                Err(e) => Response::Error(e.to_string()),
            }),
            Request::UnpinPage { page } => self.with_page(&page, |handle| {
                handle.unpin();
                Response::Ok
            }),
        };
        if response.is_error() {
            debug!(?response, "frontend.rejected");
        }
        response
    }

    fn get_page(&self, database: &str, set: &str, page: u64) -> Response {
        let key = match named_key(database, set, page) {
            Ok(key) => key,
            Err(response) => return response,
        };
        let Some(set) = key.set() else {
            return Response::Error(format!("{} is not a named page", key));
        };
        match self.manager.get_page(set, page) {
            Ok(handle) => self.send(handle),
            Err(e) => Response::Error(e.to_string()),
        }
    }

    fn get_anonymous_page(&self, min_bytes: Option<usize>) -> Response {
        let page_size = self.manager.page_size();
        let min_bytes = min_bytes.unwrap_or(page_size);
        if min_bytes > page_size {
            return Response::Error(format!(
                "{} bytes requested, page size is {}",
                min_bytes, page_size
            ));
        }
        match self.manager.get_anonymous_page_min(min_bytes) {
            Ok(handle) => self.send(handle),
            Err(e) => Response::Error(e.to_string()),
        }
    }

    fn send(&self, handle: PageHandle) -> Response {
        let info = PageInfo::from(&handle);
        // A page requested twice keeps one handle; replacing it leaves the
        // reference count positive throughout.
        let replaced = self.sent.lock().insert(handle.key().clone(), handle);
        drop(replaced);
        Response::Page(info)
    }

    fn return_page(&self, key: &PageKey) -> Response {
        let handle = self.sent.lock().remove(key);
        match handle {
            Some(handle) => {
                drop(handle);
                Response::Ok
            }
            None => Response::Error(format!("{} was not handed out", key)),
        }
    }

    fn with_page(&self, page: &PageRef, op: impl FnOnce(&mut PageHandle) -> Response) -> Response {
        let key = match page {
            PageRef::Named {
                database,
                set,
                page,
            } => match named_key(database, set, *page) {
                Ok(key) => key,
                Err(response) => return response,
            },
            PageRef::Anonymous { page } => PageKey::Anonymous(*page),
        };

        // Pin and unpin may do disk I/O; run them on a clone, off the map lock.
        let handle = self.sent.lock().get(&key).cloned();
        match handle {
            Some(mut handle) => op(&mut handle),
            None => Response::Error(format!("{} was not handed out", key)),
        }
    }
}

fn named_key(database: &str, set: &str, page: u64) -> Result<PageKey, Response> {
    if !is_valid_name(database) || !is_valid_name(set) {
        return Err(Response::Error(format!(
            "malformed set identity {:?}.{:?}",
            database, set
        )));
    }
    Ok(PageKey::named(SetId::new(database, set), page))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BufferManagerConfig;
    use tempfile::{tempdir, TempDir};

    fn create_frontend(num_full_pages: usize) -> (TempDir, BufferManagerFrontend) {
        let dir = tempdir().unwrap();
        let config = BufferManagerConfig::new(dir.path()).with_pages(64, num_full_pages);
        let frontend = BufferManagerFrontend::new(BufferManager::new(config).unwrap());
        (dir, frontend)
    }

    fn page_info(response: Response) -> PageInfo {
        match response {
            Response::Page(info) => info,
            other => panic!("expected a page, got {:?}", other),
        }
    }

    #[test]
    fn test_get_page_reports_placement() {
        let (_dir, frontend) = create_frontend(4);

        let info = page_info(frontend.handle(Request::GetPage {
            database: "db".into(),
            set: "s".into(),
            page: 5,
        }));

        assert_eq!(info.full_page, Some(0));
        assert_eq!(info.offset, Some(0));
        assert!(info.pinned);
        assert!(!info.is_anonymous);
        assert_eq!(info.page_num, 5);
        assert_eq!(info.num_bytes, 64);
        assert_eq!(info.start_pos, None);
        assert_eq!(info.database.as_deref(), Some("db"));
        assert_eq!(frontend.outstanding(), 1);
    }

    #[test]
    fn test_malformed_requests_are_rejected() {
        let (_dir, frontend) = create_frontend(4);

        assert!(frontend
            .handle(Request::GetPage {
                database: "db".into(),
                set: "../x".into(),
                page: 0,
            })
            .is_error());
        assert!(frontend
            .handle(Request::GetAnonymousPage {
                min_bytes: Some(65)
            })
            .is_error());
        assert!(frontend
            .handle(Request::ReturnAnonymousPage { page: 42 })
            .is_error());
    }

    #[test]
    fn test_freeze_after_unpin_is_an_error_response() {
        let (_dir, frontend) = create_frontend(4);
        let info = page_info(frontend.handle(Request::GetAnonymousPage {
            min_bytes: Some(16),
        }));
        let page = PageRef::Anonymous {
            page: info.page_num,
        };

        assert_eq!(
            frontend.handle(Request::FreezeSize {
                page: page.clone(),
                bytes: 10
            }),
            Response::Ok
        );
        assert_eq!(
            frontend.handle(Request::UnpinPage { page: page.clone() }),
            Response::Ok
        );
        assert!(frontend
            .handle(Request::FreezeSize { page, bytes: 4 })
            .is_error());
    }

    #[test]
    fn test_pin_after_unpin() {
        let (_dir, frontend) = create_frontend(4);
        frontend.handle(Request::GetPage {
            database: "db".into(),
            set: "s".into(),
            page: 0,
        });
        let page = PageRef::Named {
            database: "db".into(),
            set: "s".into(),
            page: 0,
        };

        frontend.handle(Request::UnpinPage { page: page.clone() });
        let info = page_info(frontend.handle(Request::PinPage { page }));

        assert!(info.pinned);
        assert!(info.size_frozen);
        assert_eq!(info.start_pos, Some(0));
    }

    #[test]
    fn test_slow_pin_does_not_hold_up_other_requests() {
        let (_dir, frontend) = create_frontend(2);
        let anonymous = |frontend: &BufferManagerFrontend| {
            page_info(frontend.handle(Request::GetAnonymousPage { min_bytes: None })).page_num
        };

        let p = anonymous(&frontend);
        let q = anonymous(&frontend);
        frontend.handle(Request::UnpinPage {
            page: PageRef::Anonymous { page: q },
        });
        // Evicts q's full page; r stays pinned.
        let _r = anonymous(&frontend);

        // A view of p taken through a second handle keeps p's full page
        // from being reclaimed after the frontend unpins it.
        let handle = frontend.sent.lock().get(&PageKey::Anonymous(p)).cloned().unwrap();
        let view = handle.bytes();
        frontend.handle(Request::UnpinPage {
            page: PageRef::Anonymous { page: p },
        });

        std::thread::scope(|scope| {
            let pin = scope.spawn(|| {
                frontend.handle(Request::PinPage {
                    page: PageRef::Anonymous { page: q },
                })
            });
            std::thread::sleep(std::time::Duration::from_millis(50));

            // The pin of q is waiting to evict p; the map stays usable.
            assert_eq!(frontend.outstanding(), 3);
            drop(view);

            let info = page_info(pin.join().unwrap());
            assert!(info.pinned);
        });
    }

    #[test]
    fn test_return_anonymous_page_frees_it() {
        let (_dir, frontend) = create_frontend(4);
        let info = page_info(frontend.handle(Request::GetAnonymousPage { min_bytes: None }));

        assert_eq!(frontend.manager().page_count(), 1);
        assert_eq!(
            frontend.handle(Request::ReturnAnonymousPage {
                page: info.page_num
            }),
            Response::Ok
        );
        assert_eq!(frontend.manager().page_count(), 0);
        assert_eq!(frontend.outstanding(), 0);
    }
}
