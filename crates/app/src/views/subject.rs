//! Materials of one subject

use campus_core::Subject;
use campus_net::{ChangeEvent, EventKind, Subscription, Topic};

use crate::backend::Backend;
use crate::error::Result;
use crate::store::ClientStore;

pub struct SubjectView {
    subject: Subject,
    subscription: Subscription,
}

impl SubjectView {
    pub async fn open(backend: &Backend, store: &mut ClientStore, subject: Subject) -> Result<Self> {
        let subscription = backend.subscribe(Topic::materials_of(subject.id));
        for material in backend.list_materials(subject.id).await? {
            store.merge_material(EventKind::Update, material);
        }
        Ok(Self {
            subject,
            subscription,
        })
    }

    pub fn subject(&self) -> &Subject {
        &self.subject
    }

    pub async fn next_event(&mut self) -> Option<ChangeEvent> {
        self.subscription.recv().await
    }
}
