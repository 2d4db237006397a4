//! OData properties -> attribute values of an [`Instance`].

use super::value::ValueConverter;
use crate::access::Instance;
use crate::error::{MessageKey, ProcessorError, Result};
use crate::schema::{Attribute, StructuredType};
use odata_core::ast::Value;
use odata_core::{ComplexValue, Property, PropertyContainer, PropertyValue};
use std::sync::Arc;

/// Writes request properties into an instance supplied by the schema layer.
///
/// Database-generated keys are rejected before anything is written.
pub struct WriteConverter {
    values: Arc<ValueConverter>,
}

impl WriteConverter {
    pub fn new(values: Arc<ValueConverter>) -> Self {
        Self { values }
    }

    pub fn convert(&self, ty: &StructuredType, properties: &[Property], target: &mut dyn Instance) -> Result<()> {
        for property in properties {
            if let Some(attr) = ty.find_attribute(&property.name) {
                if attr.key && attr.generated && !property.value.is_null() {
                    return Err(ProcessorError::new(
                        MessageKey::GeneratedKeyAttributeIsNotSupported,
                        [property.name.as_str()],
                    ));
                }
            }
        }
        for property in properties {
            let Some(attr) = ty.find_attribute(&property.name) else {
                let key = if ty.find_association(&property.name).is_some() {
                    MessageKey::NotSupportedAttributeType
                } else {
                    MessageKey::QueryPreparationUnknownProperty
                };
                return Err(ProcessorError::new(key, [property.name.as_str(), ty.name.as_str()]));
            };
            if attr.ignore {
                continue;
            }
            self.write_attribute(attr, &property.value, target)?;
        }
        Ok(())
    }

    fn write_attribute(&self, attr: &Attribute, value: &PropertyValue, target: &mut dyn Instance) -> Result<()> {
        if attr.collection {
            return self.write_collection(attr, value, target);
        }
        match attr.complex_type() {
            Some(ct) if attr.is_embedded_id() => {
                let PropertyValue::Complex(cv) = value else {
                    return Err(must_not_be_null(attr));
                };
                for component in &ct.attributes {
                    if cv.value_of(&component.external_name).map_or(true, PropertyValue::is_null) {
                        return Err(must_not_be_null(component));
                    }
                }
                self.convert(ct, &cv.properties, target.complex(attr)?)
            }
            Some(ct) => match value {
                PropertyValue::Null => target.clear(attr),
                PropertyValue::Complex(cv) => self.convert(ct, &cv.properties, target.complex(attr)?),
                other => Err(invalid_complex(attr, other)),
            },
            None => {
                let null = Value::Null;
                let primitive = match value {
                    PropertyValue::Null => &null,
                    PropertyValue::Primitive(v) => v,
                    other => return Err(invalid_complex(attr, other)),
                };
                if primitive.is_null() && !attr.nullable {
                    return Err(must_not_be_null(attr));
                }
                let stored = self.values.to_storage(attr, primitive)?;
                target.set_value(attr, stored)
            }
        }
    }

    fn write_collection(&self, attr: &Attribute, value: &PropertyValue, target: &mut dyn Instance) -> Result<()> {
        let items = match value {
            PropertyValue::Null => return target.clear(attr),
            PropertyValue::Collection(items) => items,
            other => return Err(invalid_complex(attr, other)),
        };
        if target.collection_len(&attr.internal_name) != 0 {
            return Err(ProcessorError::illegal_state(format!(
                "collection attribute '{}' is not empty before write",
                attr.internal_name
            )));
        }
        for item in items {
            match (attr.complex_type(), item) {
                (Some(ct), PropertyValue::Complex(cv)) => self.write_entry(ct, cv, attr, target)?,
                (None, PropertyValue::Primitive(v)) => {
                    let stored = self.values.to_storage(attr, v)?;
                    target.push_value(attr, stored)?;
                }
                (_, other) => return Err(invalid_complex(attr, other)),
            }
        }
        Ok(())
    }

    fn write_entry(
        &self,
        ct: &StructuredType,
        entry: &ComplexValue,
        attr: &Attribute,
        target: &mut dyn Instance,
    ) -> Result<()> {
        let instance = target.push_complex(attr)?;
        self.convert(ct, &entry.properties, instance)
    }
}

fn must_not_be_null(attr: &Attribute) -> ProcessorError {
    ProcessorError::new(MessageKey::AttributeMustNotBeNull, [attr.external_name.as_str()])
}

fn invalid_complex(attr: &Attribute, value: &PropertyValue) -> ProcessorError {
    let found = match value {
        PropertyValue::Null => "null",
        PropertyValue::Primitive(_) => "a primitive value",
        PropertyValue::Complex(_) => "a complex value",
        PropertyValue::Collection(_) => "a collection",
    };
    ProcessorError::new(
        MessageKey::InvalidComplexType,
        [attr.external_name.clone(), format!("found {found}")],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::{Field, Record};
    use crate::config::ProcessorConfig;
    use crate::convert::{ConverterRegistry, EntityConverter};
    use crate::db::DbValue;
    use crate::keys::NavigationKeyBuilder;
    use crate::result::{ResultScope, Tuple};
    use crate::schema::{Association, EdmPrimitive, EnumStorage, EnumType, JoinColumn, Schema, StorageType};

    fn values() -> Arc<ValueConverter> {
        Arc::new(ValueConverter::new(Arc::new(ConverterRegistry::with_defaults())))
    }

    fn address() -> Arc<StructuredType> {
        Arc::new(
            StructuredType::complex("Address")
                .attribute(Attribute::primitive("Street", EdmPrimitive::String, StorageType::String))
                .attribute(Attribute::primitive("Country", EdmPrimitive::String, StorageType::String)),
        )
    }

    fn person() -> StructuredType {
        let rights = Arc::new(EnumType::new("AccessRights", ["Read", "Write"], EnumStorage::Ordinal));
        StructuredType::entity("Person", "person")
            .attribute(Attribute::primitive("ID", EdmPrimitive::String, StorageType::String).column("id").key())
            .attribute(Attribute::primitive("Name", EdmPrimitive::String, StorageType::String).not_null())
            .attribute(Attribute::primitive("Age", EdmPrimitive::Int32, StorageType::Int))
            .attribute(Attribute::enumeration("Rights", rights))
            .attribute(Attribute::complex("Address", address()))
            .attribute(
                Attribute::primitive("Tags", EdmPrimitive::String, StorageType::String)
                    .element_collection("person_tag", vec![JoinColumn::new("id", "person_id")]),
            )
            .attribute(
                Attribute::complex("InhouseAddress", address())
                    .element_collection("inhouse_address", vec![JoinColumn::new("id", "person_id")]),
            )
            .association(Association::to_many("Roles", "Role").join("id", "person_id"))
    }

    fn complex(props: Vec<Property>) -> PropertyValue {
        PropertyValue::Complex(ComplexValue {
            properties: props,
            navigation_links: Vec::new(),
        })
    }

    #[test]
    fn simple_attributes_round_trip_through_read_and_write() {
        let schema = Schema::builder().entity_set("Persons", person()).build().unwrap();
        let ty = schema.entity_type("Person").unwrap().clone();
        let values = values();
        let config = ProcessorConfig::default();
        let row = Tuple::default()
            .with("ID", DbValue::String(Some(Box::new("7".into()))))
            .with("Name", DbValue::String(Some(Box::new("Ada".into()))))
            .with("Age", DbValue::Int(Some(36)))
            .with("Rights", DbValue::Int(Some(1)));
        let scope = ResultScope::new(ty.clone(), NavigationKeyBuilder::root(ty.clone()));
        let entity = EntityConverter::new(&schema, &values, &config)
            .convert_rows(&scope, std::slice::from_ref(&row))
            .unwrap()
            .remove(0);

        let mut record = Record::new("Person");
        WriteConverter::new(values)
            .convert(&ty, &entity.properties, &mut record)
            .unwrap();
        for (alias, stored) in row.iter() {
            let attr = ty.find_attribute(alias).unwrap();
            assert_eq!(record.field(&attr.internal_name), Some(&Field::Value(stored.clone())), "{alias}");
        }
    }

    #[test]
    fn generated_key_is_rejected_before_writing() {
        let ty = StructuredType::entity("Counter", "counter")
            .attribute(Attribute::primitive("ID", EdmPrimitive::Int64, StorageType::BigInt).key().generated())
            .attribute(Attribute::primitive("Label", EdmPrimitive::String, StorageType::String));
        let mut record = Record::new("Counter");
        let err = WriteConverter::new(values())
            .convert(
                &ty,
                &[Property::primitive("Label", "x"), Property::primitive("ID", 5)],
                &mut record,
            )
            .unwrap_err();
        assert_eq!(err.status(), http::StatusCode::PRECONDITION_FAILED);
        assert!(record.field("label").is_none());
    }

    #[test]
    fn complex_and_collection_attributes() {
        let ty = person();
        let mut record = Record::new("Person");
        let props = vec![
            Property::new("Address", complex(vec![Property::primitive("Street", "Main")])),
            Property::new(
                "Tags",
                PropertyValue::Collection(vec![
                    PropertyValue::Primitive(Value::from("a")),
                    PropertyValue::Primitive(Value::from("b")),
                ]),
            ),
            Property::new(
                "InhouseAddress",
                PropertyValue::Collection(vec![
                    complex(vec![Property::primitive("Street", "A")]),
                    complex(vec![Property::primitive("Street", "B")]),
                ]),
            ),
        ];
        WriteConverter::new(values()).convert(&ty, &props, &mut record).unwrap();
        assert!(record.nested("address").unwrap().value("street").is_some());
        assert_eq!(record.collection_len("tags"), 2);
        assert_eq!(record.collection_len("inhouseAddress"), 2);
    }

    #[test]
    fn rejects_bad_input() {
        let ty = person();
        let conv = WriteConverter::new(values());

        let err = conv
            .convert(&ty, &[Property::new("Name", PropertyValue::Null)], &mut Record::new("Person"))
            .unwrap_err();
        assert_eq!(err.key(), MessageKey::AttributeMustNotBeNull);

        let err = conv
            .convert(&ty, &[Property::primitive("Nope", 1)], &mut Record::new("Person"))
            .unwrap_err();
        assert_eq!(err.key(), MessageKey::QueryPreparationUnknownProperty);

        let err = conv
            .convert(&ty, &[Property::primitive("Roles", 1)], &mut Record::new("Person"))
            .unwrap_err();
        assert_eq!(err.key(), MessageKey::NotSupportedAttributeType);

        let err = conv
            .convert(&ty, &[Property::primitive("Address", "x")], &mut Record::new("Person"))
            .unwrap_err();
        assert_eq!(err.key(), MessageKey::InvalidComplexType);

        let err = conv
            .convert(&ty, &[Property::primitive("Rights", 2)], &mut Record::new("Person"))
            .unwrap_err();
        assert_eq!(err.key(), MessageKey::InvalidEnumValue);
    }

    #[test]
    fn embedded_id_components_must_be_set() {
        let key = Arc::new(
            StructuredType::complex("RoleKey")
                .attribute(Attribute::primitive("BusinessPartnerID", EdmPrimitive::String, StorageType::String))
                .attribute(Attribute::primitive("RoleCategory", EdmPrimitive::String, StorageType::String)),
        );
        let ty = StructuredType::entity("Role", "role").attribute(Attribute::embedded_id("Key", key));
        let conv = WriteConverter::new(values());

        let partial = complex(vec![Property::primitive("BusinessPartnerID", "1")]);
        let err = conv
            .convert(&ty, &[Property::new("Key", partial)], &mut Record::new("Role"))
            .unwrap_err();
        assert_eq!(err.key(), MessageKey::AttributeMustNotBeNull);
        assert_eq!(err.params(), ["RoleCategory"]);

        let full = complex(vec![
            Property::primitive("BusinessPartnerID", "1"),
            Property::primitive("RoleCategory", "A"),
        ]);
        let mut record = Record::new("Role");
        conv.convert(&ty, &[Property::new("Key", full)], &mut record).unwrap();
        assert!(record.nested("key").unwrap().value("roleCategory").is_some());
    }
}
