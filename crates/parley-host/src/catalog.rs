//! Descriptors and intents served by the reference host.

use std::sync::Arc;

use parley_core::{
    DescriptorError, ElementDomain, EntityId, Entry, Mutation, PropertyDescriptor, PropertyShape,
    RelationDescriptor, RelationOp, ScalarOp, SequenceOp, SetOp, StaticRegistry, SymbolSpec,
};
use parley_negotiate::{
    predicate, transform, Action, ActionCategory, Catalog, Feature, Intent, When,
};
use serde_json::json;

/// The order schema.
#[derive(Clone)]
pub struct OrderSchema {
    pub items: Arc<PropertyDescriptor>,
    pub total: Arc<PropertyDescriptor>,
    pub tags: Arc<PropertyDescriptor>,
    pub lines: Arc<RelationDescriptor>,
}

impl OrderSchema {
    pub fn new() -> Result<Self, DescriptorError> {
        let order = || SymbolSpec::required("The order being edited").of_kind("order");

        Ok(Self {
            items: PropertyDescriptor::builder("order_items", PropertyShape::Sequence)
                .description("Item names in display order")
                .anchor("order", order())
                .element(ElementDomain::Text)
                .build()?,
            total: PropertyDescriptor::builder("order_total", PropertyShape::Scalar)
                .description("Total in cents")
                .anchor("order", order())
                .element(ElementDomain::Integer)
                .build()?,
            tags: PropertyDescriptor::builder("order_tags", PropertyShape::Set)
                .anchor("order", order())
                .element(ElementDomain::Text)
                .build()?,
            lines: RelationDescriptor::builder("order_lines")
                .description("Products on the order")
                .anchor("order", order())
                .entry("sku", SymbolSpec::required("A product").of_kind("sku"))
                .build()?,
        })
    }

    pub fn registry(&self) -> Result<StaticRegistry, DescriptorError> {
        StaticRegistry::new()
            .with(self.items.clone())?
            .with(self.total.clone())?
            .with(self.tags.clone())?
            .with(self.lines.clone())
    }

    pub fn catalog(&self) -> Result<Catalog, DescriptorError> {
        let feature = Feature::new("orders", "Create and edit orders")
            .intent(self.add_items()?)
            .intent(self.clear_order()?);
        Ok(Catalog::new().feature(feature))
    }

    fn add_items(&self) -> Result<Intent, DescriptorError> {
        let schema = self.clone();
        let add = transform(move |anchor, stream| {
            let schema = schema.clone();
            async move {
                let line = Entry::new().with("sku", EntityId::new("sku", "espresso"));
                let stream = stream
                    .with_property("items", &schema.items)?
                    .with_property("total", &schema.total)?
                    .with_property("tags", &schema.tags)?
                    .with_relation("lines", &schema.lines)?
                    .fact(
                        "items",
                        Mutation::Sequence(SequenceOp::Append {
                            after: None,
                            values: vec![json!("espresso"), json!("croissant")],
                        }),
                    )?
                    .fact(
                        "items",
                        Mutation::Sequence(SequenceOp::Append {
                            after: Some(json!("espresso")),
                            values: vec![json!("water")],
                        }),
                    )?
                    .fact("total", Mutation::Scalar(ScalarOp::Assign(json!(650))))?
                    .fact(
                        "tags",
                        Mutation::Set(SetOp::Insert(vec![json!("breakfast")])),
                    )?
                    .fact("lines", Mutation::Relation(RelationOp::Insert(vec![line])))?;
                Ok((anchor, stream))
            }
        });

        let open = predicate(|anchor| async move {
            Ok(anchor
                .iter()
                .all(|(_, id)| id.kind != "order" || !id.id.starts_with("closed-")))
        });

        Intent::builder("add_items")
            .purpose("Add the usual breakfast to an order")
            .symbol("order", SymbolSpec::required("Which order should I add to?").of_kind("order"))
            .reminder(When::soft("Ask which order to add to"))
            .action(
                Action::new("append", ActionCategory::Update, add)
                    .when(When::hard(open).with_soft("The order must still be open")),
            )
            .build()
    }

    fn clear_order(&self) -> Result<Intent, DescriptorError> {
        let schema = self.clone();
        let clear = transform(move |anchor, stream| {
            let schema = schema.clone();
            async move {
                let stream = stream
                    .with_property("items", &schema.items)?
                    .with_property("total", &schema.total)?
                    .fact("items", Mutation::Sequence(SequenceOp::Clear))?
                    .fact("total", Mutation::Scalar(ScalarOp::Clear))?;
                Ok((anchor, stream))
            }
        });

        Intent::builder("clear_order")
            .purpose("Remove everything from an order")
            .symbol("order", SymbolSpec::required("Which order should I clear?").of_kind("order"))
            .action(Action::new("clear", ActionCategory::Delete, clear))
            .build()
    }
}
