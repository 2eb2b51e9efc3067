//! GraphQL documents sent to the portal.

/// Driver profile plus linked chargepoints.
pub const BOOTSTRAP: &str = r#"
query bootstrap {
  getDriver {
    id
    firstName
    lastName
    email
    iban
    installationState
    chargepoints {
      id
      chargepointId
      isPublic
      currentTariff {
        id
        currency
        ... on SimpleTariff {
          energyPrice
        }
      }
      evses {
        id
        evseId
        status
      }
    }
  }
}
"#;

/// One page of the transaction list.
pub const TRANSACTION_LIST_PAGE: &str = r#"
query TransactionListPage($page: PageInput, $filter: FilterInput) {
  listTransactions(page: $page, filter: $filter) {
    totalCount
    page {
      page
      size
      sort
    }
    items {
      id
      type
      chargepointId
      visualNumber
      tariff
      startDateTime
      endDateTime
      totalEnergy
      totalCost
      status
      errorCode
      invoicePeriod
    }
  }
}
"#;
